use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::UiPilotResult;
use crate::perception::snapshot::StructuralSnapshot;
use crate::perception::types::Region;

/// A raw visual capture handed to text recognition and, when the screenshot
/// policy decides so, to the planner.
#[derive(Debug, Clone)]
pub struct Capture {
    /// PNG bytes, base64-encoded at the prompt boundary.
    pub bytes: Vec<u8>,
    pub width: i32,
    pub height: i32,
}

/// Structural-tree perception for the active surface (or a sub-region of it).
/// Synchronous: the platform tree walk completes in-process.
pub trait StructuralPerception: Send + Sync {
    fn snapshot(&self) -> UiPilotResult<StructuralSnapshot>;
}

/// Visual capture of the target surface. `None` means the surface could not
/// be captured this instant (secure screen, mid-transition).
#[async_trait]
pub trait VisualPerception: Send + Sync {
    async fn capture(&self) -> UiPilotResult<Option<Capture>>;
}

/// Text recognition over a capture.
#[async_trait]
pub trait TextRecognition: Send + Sync {
    async fn recognize(&self, capture: &Capture) -> UiPilotResult<Vec<Region>>;
}

/// Hides and restores agent presentation (overlays, progress chrome) around a
/// capture so the agent never perceives itself. Ordered, not timed: restore
/// is called only after the capture completed or failed.
#[async_trait]
pub trait Overlay: Send + Sync {
    async fn hide(&self);
    async fn restore(&self);
}

/// Primary/fallback recognition chain, tolerant of total unavailability: a
/// failing primary falls through to the fallback, and a failing fallback
/// yields an empty region set rather than an error.
pub struct RecognitionChain {
    primary: Option<Arc<dyn TextRecognition>>,
    fallback: Option<Arc<dyn TextRecognition>>,
}

impl RecognitionChain {
    pub fn new(
        primary: Option<Arc<dyn TextRecognition>>,
        fallback: Option<Arc<dyn TextRecognition>>,
    ) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl TextRecognition for RecognitionChain {
    async fn recognize(&self, capture: &Capture) -> UiPilotResult<Vec<Region>> {
        if let Some(primary) = &self.primary {
            match primary.recognize(capture).await {
                Ok(regions) => return Ok(regions),
                Err(e) => {
                    tracing::warn!(error = %e, "primary text recognition failed, trying fallback");
                }
            }
        }
        if let Some(fallback) = &self.fallback {
            match fallback.recognize(capture).await {
                Ok(regions) => return Ok(regions),
                Err(e) => {
                    tracing::warn!(error = %e, "fallback text recognition failed");
                }
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::UiPilotError;
    use crate::perception::types::{Bounds, Provenance, RegionKind};

    struct Failing;

    #[async_trait]
    impl TextRecognition for Failing {
        async fn recognize(&self, _capture: &Capture) -> UiPilotResult<Vec<Region>> {
            Err(UiPilotError::Perception("backend offline".into()))
        }
    }

    struct Fixed(String);

    #[async_trait]
    impl TextRecognition for Fixed {
        async fn recognize(&self, _capture: &Capture) -> UiPilotResult<Vec<Region>> {
            Ok(vec![Region {
                id: String::new(),
                kind: RegionKind::Text,
                text: self.0.clone(),
                bounds: Bounds::new(0, 0, 10, 10),
                clickable: false,
                provenance: Provenance::TextRecognition,
            }])
        }
    }

    fn capture() -> Capture {
        Capture { bytes: vec![0u8; 4], width: 2, height: 2 }
    }

    #[tokio::test]
    async fn chain_falls_back_when_primary_fails() {
        let chain = RecognitionChain::new(
            Some(Arc::new(Failing)),
            Some(Arc::new(Fixed("hello".into()))),
        );
        let regions = chain.recognize(&capture()).await.unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "hello");
    }

    #[tokio::test]
    async fn chain_tolerates_total_unavailability() {
        let chain = RecognitionChain::new(Some(Arc::new(Failing)), Some(Arc::new(Failing)));
        assert!(chain.recognize(&capture()).await.unwrap().is_empty());

        let none = RecognitionChain::new(None, None);
        assert!(none.recognize(&capture()).await.unwrap().is_empty());
    }
}
