pub mod blackboard;
pub mod coordinator;
pub mod engine;
pub mod history;
pub mod state;
pub mod stuck;
