use async_trait::async_trait;

use crate::errors::UiPilotResult;
use crate::planner::types::ConversationTurn;

/// Provider-agnostic planner transport: the full turn sequence plus the
/// instruction block in, raw completion text or a typed failure out. One
/// attempt per call — retry policy belongs to the loop, not the transport.
///
/// Implementations report upload size and latency through the telemetry
/// side-channel, never through the return value.
#[async_trait]
pub trait PlannerTransport: Send + Sync {
    async fn complete(
        &self,
        turns: &[ConversationTurn],
        instructions: &str,
    ) -> UiPilotResult<String>;

    /// Credential/configuration precondition. Checked once before the loop
    /// enters RUNNING so a missing key fails fast without a network call.
    fn ready(&self) -> bool {
        true
    }
}
