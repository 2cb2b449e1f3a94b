//! Local answer extraction for EXTRACT steps.
//!
//! Strategies run in priority order — count, price, kind listing, region
//! lookup, keyword scan — and the first hit wins. Only when all of them miss
//! does the executor fall back to a planner call.

use regex::Regex;

use crate::perception::types::{EnvironmentMap, RegionKind};

/// Try every local strategy against the map. `None` means no local answer.
pub fn extract_local(map: &EnvironmentMap, query: &str) -> Option<String> {
    let q = query.trim().to_ascii_lowercase();
    if q.is_empty() {
        return None;
    }
    count_strategy(map, &q)
        .or_else(|| price_strategy(map, &q))
        .or_else(|| kind_strategy(map, &q))
        .or_else(|| region_strategy(map, &q))
        .or_else(|| keyword_strategy(map, &q))
}

/// "how many X" / "count X" → number of regions whose text mentions X.
fn count_strategy(map: &EnvironmentMap, q: &str) -> Option<String> {
    let subject = q
        .strip_prefix("how many ")
        .or_else(|| q.strip_prefix("count "))?
        .trim_end_matches('?')
        .trim();
    let needle = subject.trim_end_matches('s');
    let count = map
        .regions
        .iter()
        .filter(|r| r.text.to_ascii_lowercase().contains(needle))
        .count();
    Some(format!("{count} region(s) matching {subject:?}"))
}

/// Price-shaped queries → every currency amount visible on screen.
fn price_strategy(map: &EnvironmentMap, q: &str) -> Option<String> {
    if !(q.contains("price") || q.contains("cost") || q.contains("how much")) {
        return None;
    }
    let money = Regex::new(r"[$€£¥]\s?\d+(?:[.,]\d{2})?").ok()?;
    let found: Vec<&str> = map
        .regions
        .iter()
        .flat_map(|r| money.find_iter(&r.text).map(|m| m.as_str()))
        .collect();
    if found.is_empty() {
        None
    } else {
        Some(found.join(", "))
    }
}

/// "list buttons" / "what inputs" → labels of regions of that kind.
fn kind_strategy(map: &EnvironmentMap, q: &str) -> Option<String> {
    let kind = [
        ("button", RegionKind::Button),
        ("input", RegionKind::Input),
        ("link", RegionKind::Link),
        ("tab", RegionKind::Tab),
        ("switch", RegionKind::Switch),
        ("checkbox", RegionKind::Checkbox),
    ]
    .iter()
    .find(|(name, _)| q.contains(name) && (q.starts_with("list") || q.starts_with("what")))
    .map(|(_, k)| *k)?;

    let labels: Vec<&str> = map
        .regions
        .iter()
        .filter(|r| r.kind == kind && !r.text.is_empty())
        .map(|r| r.text.as_str())
        .collect();
    if labels.is_empty() {
        None
    } else {
        Some(labels.join(", "))
    }
}

/// Query naming a region id directly → that region's text.
fn region_strategy(map: &EnvironmentMap, q: &str) -> Option<String> {
    map.regions
        .iter()
        .find(|r| q.contains(&r.id))
        .filter(|r| !r.text.is_empty())
        .map(|r| r.text.clone())
}

/// Last local resort: the text of regions sharing a significant query word.
fn keyword_strategy(map: &EnvironmentMap, q: &str) -> Option<String> {
    let words: Vec<&str> = q
        .split_whitespace()
        .filter(|w| w.len() >= 4)
        .collect();
    if words.is_empty() {
        return None;
    }
    let hits: Vec<&str> = map
        .regions
        .iter()
        .filter(|r| {
            let text = r.text.to_ascii_lowercase();
            !text.is_empty() && words.iter().any(|w| text.contains(w))
        })
        .map(|r| r.text.as_str())
        .take(5)
        .collect();
    if hits.is_empty() {
        None
    } else {
        Some(hits.join("; "))
    }
}
