//! Diffs two canonical map renderings so the planner can see consequences of
//! its last action without re-deriving the whole map.

use std::collections::BTreeMap;

/// Lines rendered per category before the `… N more` tail.
const MAX_LINES_PER_CATEGORY: usize = 8;

/// Anchor prefix of region lines in the canonical rendering.
const ID_ANCHOR: &str = "id=";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapDiff {
    /// id → full canonical line, present now but not before.
    pub appeared: Vec<(String, String)>,
    /// ids present before but gone now.
    pub removed: Vec<String>,
    /// id → new canonical line, present in both but textually changed.
    pub changed: Vec<(String, String)>,
}

impl MapDiff {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Bounded human/planner-readable rendering. `None` when nothing changed.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut out = String::new();
        render_category(&mut out, '+', self.appeared.iter().map(|(_, line)| line.as_str()));
        render_category(&mut out, '-', self.removed.iter().map(|id| id.as_str()));
        render_category(&mut out, '~', self.changed.iter().map(|(_, line)| line.as_str()));
        Some(out)
    }
}

fn render_category<'a>(out: &mut String, sigil: char, lines: impl ExactSizeIterator<Item = &'a str>) {
    let total = lines.len();
    for (i, line) in lines.enumerate() {
        if i >= MAX_LINES_PER_CATEGORY {
            out.push_str(&format!("{sigil} …{} more\n", total - MAX_LINES_PER_CATEGORY));
            break;
        }
        out.push_str(&format!("{sigil} {line}\n"));
    }
}

/// Extracts `id → line` pairs from a canonical rendering. Non-region lines
/// (the screen header) carry no anchor and are skipped.
fn index_lines(canonical: &str) -> BTreeMap<&str, &str> {
    canonical
        .lines()
        .filter(|line| line.starts_with(ID_ANCHOR))
        .filter_map(|line| {
            let rest = &line[ID_ANCHOR.len()..];
            let id = rest.split_whitespace().next()?;
            Some((id, line))
        })
        .collect()
}

/// Diff two canonical map texts. An empty previous text yields an empty diff:
/// the first observation is not "everything appeared".
pub fn diff_canonical(previous: &str, current: &str) -> MapDiff {
    if previous.is_empty() {
        return MapDiff::default();
    }
    let prev = index_lines(previous);
    let curr = index_lines(current);

    let mut diff = MapDiff::default();
    for (id, line) in &curr {
        match prev.get(id) {
            None => diff.appeared.push((id.to_string(), line.to_string())),
            Some(old) if old != line => diff.changed.push((id.to_string(), line.to_string())),
            Some(_) => {}
        }
    }
    for id in prev.keys() {
        if !curr.contains_key(id) {
            diff.removed.push(id.to_string());
        }
    }
    diff
}
