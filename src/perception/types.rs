use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Coarse classification of a perceived region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Button,
    Input,
    Image,
    Switch,
    Checkbox,
    Tab,
    Link,
    Text,
    Unknown,
}

impl RegionKind {
    /// Short prefix used when deriving region ids.
    pub fn prefix(&self) -> &'static str {
        match self {
            RegionKind::Button => "button",
            RegionKind::Input => "input",
            RegionKind::Image => "image",
            RegionKind::Switch => "switch",
            RegionKind::Checkbox => "checkbox",
            RegionKind::Tab => "tab",
            RegionKind::Link => "link",
            RegionKind::Text => "text",
            RegionKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RegionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Which perception source produced a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Structural,
    TextRecognition,
}

/// Axis-aligned bounding box in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn center(&self) -> (i32, i32) {
        (self.left + self.width() / 2, self.top + self.height() / 2)
    }

    /// Overlap area with another box.
    pub fn intersection_area(&self, other: &Bounds) -> i64 {
        let w = (self.right.min(other.right) - self.left.max(other.left)).max(0) as i64;
        let h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0) as i64;
        w * h
    }

    /// Interior point safe for actuation: the center nudged inside an edge
    /// margin so taps on boxes that butt against neighbours or the screen
    /// edge still land inside the control.
    pub fn safe_point(&self) -> (i32, i32) {
        let margin_x = (self.width() / 6).clamp(2, 24);
        let margin_y = (self.height() / 6).clamp(2, 24);
        let (cx, cy) = self.center();
        let x = cx.clamp(self.left + margin_x, (self.right - margin_x).max(self.left + margin_x));
        let y = cy.clamp(self.top + margin_y, (self.bottom - margin_y).max(self.top + margin_y));
        (x, y)
    }
}

/// One perceived interactive or readable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub kind: RegionKind,
    pub text: String,
    pub bounds: Bounds,
    pub clickable: bool,
    pub provenance: Provenance,
}

/// Lowercase, alphanumeric/underscore slug of a label, truncated so ids stay
/// readable in prompts.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for ch in text.chars() {
        if slug.len() >= 24 {
            break;
        }
        if ch.is_alphanumeric() {
            for lc in ch.to_lowercase() {
                slug.push(lc);
            }
        } else if (ch.is_whitespace() || ch == '-' || ch == '_') && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let trimmed = slug.trim_matches('_').to_string();
    if trimmed.is_empty() {
        "unlabeled".into()
    } else {
        trimmed
    }
}

/// Derives a stable region id from kind + normalized text, never from array
/// position, so ids survive reordering between iterations and diffs stay
/// meaningful. Duplicate labels get a numeric suffix in encounter order.
pub fn derive_region_id(
    kind: RegionKind,
    text: &str,
    seen: &mut HashMap<String, u32>,
) -> String {
    let base = format!("{}_{}", kind.prefix(), slugify(text));
    let n = seen.entry(base.clone()).or_insert(0);
    *n += 1;
    if *n == 1 {
        base
    } else {
        format!("{base}_{n}")
    }
}

/// Full region set for one perception instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentMap {
    pub regions: Vec<Region>,
    pub width: i32,
    pub height: i32,
    /// Embedded rich content (web view, video surface, canvas) present.
    pub rich_content: bool,
    pub input_method_visible: bool,
}

impl EnvironmentMap {
    pub fn empty(width: i32, height: i32) -> Self {
        Self {
            regions: Vec::new(),
            width,
            height,
            rich_content: false,
            input_method_visible: false,
        }
    }

    pub fn region(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn center(&self) -> (i32, i32) {
        (self.width / 2, self.height / 2)
    }

    /// Canonical deterministic text rendering. Used verbatim both as planner
    /// input and as the diff key, so the format is load-bearing: one `id=`
    /// anchored line per region, stable ordering, no timestamps.
    pub fn canonical_text(&self) -> String {
        let mut out = String::with_capacity(64 + self.regions.len() * 96);
        out.push_str(&format!(
            "screen {}x{} regions={}{}{}\n",
            self.width,
            self.height,
            self.regions.len(),
            if self.rich_content { " rich_content" } else { "" },
            if self.input_method_visible { " ime_visible" } else { "" },
        ));
        for r in &self.regions {
            out.push_str(&format!(
                "id={} kind={} text={:?} bounds=({},{},{},{}) clickable={}\n",
                r.id,
                r.kind,
                r.text,
                r.bounds.left,
                r.bounds.top,
                r.bounds.right,
                r.bounds.bottom,
                r.clickable,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(id: &str, kind: RegionKind, text: &str) -> Region {
        Region {
            id: id.into(),
            kind,
            text: text.into(),
            bounds: Bounds::new(0, 0, 100, 40),
            clickable: true,
            provenance: Provenance::Structural,
        }
    }

    #[test]
    fn slugify_normalizes_and_truncates() {
        assert_eq!(slugify("Save Changes"), "save_changes");
        assert_eq!(slugify("  !!  "), "unlabeled");
        assert!(slugify("a very long label that keeps going on").len() <= 24);
    }

    #[test]
    fn derived_ids_are_stable_and_disambiguated() {
        let mut seen = HashMap::new();
        assert_eq!(derive_region_id(RegionKind::Button, "Save", &mut seen), "button_save");
        assert_eq!(derive_region_id(RegionKind::Button, "Save", &mut seen), "button_save_2");
        assert_eq!(derive_region_id(RegionKind::Input, "Save", &mut seen), "input_save");
    }

    #[test]
    fn canonical_text_is_pure_and_order_stable() {
        let map = EnvironmentMap {
            regions: vec![
                region("button_save", RegionKind::Button, "Save"),
                region("text_title", RegionKind::Text, "Settings"),
            ],
            width: 1080,
            height: 1920,
            rich_content: true,
            input_method_visible: false,
        };
        let a = map.canonical_text();
        let b = map.canonical_text();
        assert_eq!(a, b);
        assert!(a.starts_with("screen 1080x1920 regions=2 rich_content\n"));
        assert!(a.contains("id=button_save kind=button text=\"Save\""));
    }

    #[test]
    fn safe_point_stays_inside_narrow_boxes() {
        let b = Bounds::new(0, 0, 8, 8);
        let (x, y) = b.safe_point();
        assert!(x > 0 && x < 8);
        assert!(y > 0 && y < 8);

        let wide = Bounds::new(100, 200, 500, 260);
        let (x, y) = wide.safe_point();
        assert_eq!((x, y), wide.center());
    }
}
