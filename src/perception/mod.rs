pub mod diff;
pub mod screenshot_policy;
pub mod snapshot;
pub mod traits;
pub mod types;
