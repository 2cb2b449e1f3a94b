use async_trait::async_trait;

/// Low-level gesture dispatch capability. Every method reports plain
/// success/failure; ordinary conditions (nothing under the finger, IME not
/// showing) are `false`, never errors.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn tap(&self, x: i32, y: i32) -> bool;
    async fn long_press(&self, x: i32, y: i32, duration_ms: u64) -> bool;
    async fn type_text(&self, text: &str) -> bool;
    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: u64) -> bool;
    async fn back(&self) -> bool;
    async fn home(&self) -> bool;
    async fn open_target(&self, identifier: &str) -> bool;
    async fn dismiss_input_method(&self) -> bool;
    async fn submit(&self) -> bool;
}
