//! Merges the structural region set with text-recognition regions into one
//! environment map. Pure: same inputs, same map, no side effects.

use std::collections::HashMap;

use crate::perception::types::{
    derive_region_id, EnvironmentMap, Provenance, Region, RegionKind,
};

/// A text-recognition region whose box overlaps a structural region by at
/// least this fraction of its own area is a redundant label and is dropped.
const REDUNDANT_OVERLAP_RATIO: f64 = 0.55;

/// Raw output of the structural perception source for one instant.
#[derive(Debug, Clone)]
pub struct StructuralSnapshot {
    pub regions: Vec<Region>,
    pub width: i32,
    pub height: i32,
    pub rich_content: bool,
    pub input_method_visible: bool,
}

/// Build the canonical environment map from one structural snapshot and the
/// text-recognition regions recovered from the matching capture.
///
/// Structural regions keep their order; surviving recognition regions are
/// appended with synthetic ids so the id namespace stays deterministic.
pub fn build_map(structural: StructuralSnapshot, recognized: Vec<Region>) -> EnvironmentMap {
    let mut seen: HashMap<String, u32> = HashMap::new();
    let mut regions: Vec<Region> = Vec::with_capacity(structural.regions.len() + recognized.len());

    for mut r in structural.regions {
        r.id = derive_region_id(r.kind, &r.text, &mut seen);
        r.provenance = Provenance::Structural;
        regions.push(r);
    }

    let structural_count = regions.len();
    let mut dropped = 0usize;
    for mut r in recognized {
        if is_redundant(&r, &regions[..structural_count]) {
            dropped += 1;
            continue;
        }
        r.kind = RegionKind::Text;
        r.clickable = false;
        r.provenance = Provenance::TextRecognition;
        r.id = format!("ocr_{}", derive_region_id(RegionKind::Text, &r.text, &mut seen));
        regions.push(r);
    }

    tracing::debug!(
        structural = structural_count,
        recognized_kept = regions.len() - structural_count,
        recognized_dropped = dropped,
        "environment map built"
    );

    EnvironmentMap {
        regions,
        width: structural.width,
        height: structural.height,
        rich_content: structural.rich_content,
        input_method_visible: structural.input_method_visible,
    }
}

fn is_redundant(candidate: &Region, structural: &[Region]) -> bool {
    let area = candidate.bounds.area();
    if area == 0 {
        return true;
    }
    structural.iter().any(|s| {
        let overlap = candidate.bounds.intersection_area(&s.bounds);
        overlap as f64 / area as f64 >= REDUNDANT_OVERLAP_RATIO
    })
}
