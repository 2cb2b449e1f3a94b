//! Decides whether the planner request needs the visual capture attached.
//!
//! The map's richness is scored from independent signals, each bucketed so no
//! single metric can dominate, then weighted into a 0..1 score. A poor map
//! (low richness) ships the screenshot; a rich map saves the upload.

use crate::perception::types::{EnvironmentMap, Provenance, RegionKind};

/// Signals feeding the richness score. All derivable from the map plus loop
/// bookkeeping; no network, no globals.
#[derive(Debug, Clone, Copy, Default)]
pub struct RichnessSignals {
    pub region_count: usize,
    pub clickable_count: usize,
    pub no_text_count: usize,
    pub unknown_kind_count: usize,
    pub recognition_only_count: usize,
    pub duplicate_label_count: usize,
    pub rich_content: bool,
    pub input_method_visible: bool,
    pub prior_iteration_failed: bool,
    pub stagnation_count: u32,
}

impl RichnessSignals {
    pub fn from_map(map: &EnvironmentMap, prior_iteration_failed: bool, stagnation_count: u32) -> Self {
        let mut labels: Vec<&str> = map
            .regions
            .iter()
            .filter(|r| !r.text.is_empty())
            .map(|r| r.text.as_str())
            .collect();
        labels.sort_unstable();
        let duplicate_label_count = labels.windows(2).filter(|w| w[0] == w[1]).count();

        Self {
            region_count: map.regions.len(),
            clickable_count: map.regions.iter().filter(|r| r.clickable).count(),
            no_text_count: map.regions.iter().filter(|r| r.text.is_empty()).count(),
            unknown_kind_count: map
                .regions
                .iter()
                .filter(|r| r.kind == RegionKind::Unknown)
                .count(),
            recognition_only_count: map
                .regions
                .iter()
                .filter(|r| r.provenance == Provenance::TextRecognition)
                .count(),
            duplicate_label_count,
            rich_content: map.rich_content,
            input_method_visible: map.input_method_visible,
            prior_iteration_failed,
            stagnation_count,
        }
    }
}

/// Weighted richness score in [0,1]. Deterministic and pure.
pub fn richness_score(s: &RichnessSignals) -> f64 {
    if s.region_count == 0 {
        return 0.0;
    }
    let n = s.region_count as f64;

    let clickable_q = bucket_ascending(s.clickable_count as f64 / n, &[0.05, 0.15, 0.30, 0.50]);
    let labeled_q = bucket_descending(s.no_text_count as f64 / n, &[0.10, 0.25, 0.45, 0.70]);
    let known_q = bucket_descending(s.unknown_kind_count as f64 / n, &[0.05, 0.15, 0.30, 0.50]);
    let native_q = if s.rich_content { 0.0 } else { 1.0 };
    let structural_q = bucket_descending(s.recognition_only_count as f64, &[1.0, 3.0, 6.0, 10.0]);
    let steady_q = if s.prior_iteration_failed { 0.0 } else { 1.0 };
    let unambiguous_q = bucket_descending(s.duplicate_label_count as f64, &[1.0, 2.0, 4.0, 6.0]);
    let progressing_q = if s.stagnation_count >= 2 || s.input_method_visible {
        0.0
    } else {
        1.0
    };

    let score = 0.20 * clickable_q
        + 0.20 * labeled_q
        + 0.15 * known_q
        + 0.10 * native_q
        + 0.10 * structural_q
        + 0.10 * steady_q
        + 0.10 * unambiguous_q
        + 0.05 * progressing_q;

    score.clamp(0.0, 1.0)
}

/// Attach the capture iff the map alone is too poor to plan from.
pub fn should_send_screenshot(richness: f64, threshold: f64) -> bool {
    richness < threshold
}

/// Maps a value to {0, 0.25, 0.5, 0.75, 1} by ascending thresholds: higher is
/// better.
fn bucket_ascending(value: f64, thresholds: &[f64; 4]) -> f64 {
    let mut q = 0.0;
    for t in thresholds {
        if value >= *t {
            q += 0.25;
        }
    }
    q
}

/// Same buckets with the sense inverted: lower is better.
fn bucket_descending(value: f64, thresholds: &[f64; 4]) -> f64 {
    1.0 - bucket_ascending(value, thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_signals() -> RichnessSignals {
        RichnessSignals {
            region_count: 20,
            clickable_count: 12,
            no_text_count: 1,
            unknown_kind_count: 0,
            recognition_only_count: 0,
            duplicate_label_count: 0,
            rich_content: false,
            input_method_visible: false,
            prior_iteration_failed: false,
            stagnation_count: 0,
        }
    }

    #[test]
    fn score_is_bounded_and_deterministic() {
        let s = rich_signals();
        let a = richness_score(&s);
        let b = richness_score(&s);
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn rich_map_skips_screenshot_poor_map_sends_it() {
        let rich = richness_score(&rich_signals());
        assert!(rich >= 0.62, "rich score was {rich}");
        assert!(!should_send_screenshot(rich, 0.62));

        let poor = RichnessSignals {
            region_count: 6,
            clickable_count: 0,
            no_text_count: 5,
            unknown_kind_count: 4,
            recognition_only_count: 4,
            duplicate_label_count: 2,
            rich_content: true,
            input_method_visible: false,
            prior_iteration_failed: true,
            stagnation_count: 0,
        };
        let score = richness_score(&poor);
        assert!(score < 0.62, "poor score was {score}");
        assert!(should_send_screenshot(score, 0.62));
    }

    #[test]
    fn empty_map_scores_zero() {
        assert_eq!(richness_score(&RichnessSignals::default()), 0.0);
    }

    #[test]
    fn decision_is_monotonic_non_increasing_in_richness() {
        let mut last = true;
        for i in 0..=100 {
            let sent = should_send_screenshot(i as f64 / 100.0, 0.62);
            assert!(sent <= last, "decision flipped back on at richness {i}");
            last = sent;
        }
    }

    #[test]
    fn no_single_signal_dominates() {
        // Flipping any one boolean signal on a rich map moves the score by at
        // most its weight, never below the send threshold on its own.
        let base = rich_signals();
        let base_score = richness_score(&base);
        for flip in 0..3 {
            let mut s = base;
            match flip {
                0 => s.rich_content = true,
                1 => s.prior_iteration_failed = true,
                _ => s.stagnation_count = 3,
            }
            let moved = richness_score(&s);
            assert!(base_score - moved <= 0.101, "signal {flip} moved {}", base_score - moved);
        }
    }
}
