//! Non-progress detection: identical-map counting and failure bookkeeping
//! driving stagnation recovery and strategic consults.

/// Tracks repeated canonical maps and failures between strategic consults.
#[derive(Debug)]
pub struct StuckDetector {
    last_canonical: String,
    /// Consecutive observations equal to the last distinct map, including the
    /// first of the run. Reset to 0 by the automatic BACK.
    identical_count: u32,
    failures_since_consult: u32,
    iterations_since_consult: u32,
    stagnation_threshold: u32,
    failure_threshold: u32,
    consult_cooldown: u32,
}

impl StuckDetector {
    pub fn new(stagnation_threshold: u32, failure_threshold: u32, consult_cooldown: u32) -> Self {
        Self {
            last_canonical: String::new(),
            identical_count: 0,
            failures_since_consult: 0,
            iterations_since_consult: 0,
            stagnation_threshold,
            failure_threshold,
            consult_cooldown,
        }
    }

    /// Feed the fresh canonical map text. Returns `true` when the stagnation
    /// threshold was just reached; the caller issues the automatic BACK and
    /// the counter resets so the next identical map starts a fresh run.
    pub fn observe_map(&mut self, canonical: &str) -> bool {
        if canonical == self.last_canonical {
            self.identical_count += 1;
        } else {
            self.last_canonical = canonical.to_string();
            self.identical_count = 1;
        }
        if self.identical_count >= self.stagnation_threshold {
            self.identical_count = 0;
            true
        } else {
            false
        }
    }

    pub fn identical_count(&self) -> u32 {
        self.identical_count
    }

    pub fn begin_iteration(&mut self) {
        self.iterations_since_consult += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures_since_consult += 1;
    }

    pub fn failures_outstanding(&self) -> bool {
        self.failures_since_consult > 0
    }

    /// Sustained failure: enough failures and enough iterations since the
    /// last consult.
    pub fn should_consult(&self) -> bool {
        self.failures_since_consult >= self.failure_threshold
            && self.iterations_since_consult >= self.consult_cooldown
    }

    /// A consult happened; start both tallies over.
    pub fn note_consult(&mut self) {
        self.failures_since_consult = 0;
        self.iterations_since_consult = 0;
    }
}
