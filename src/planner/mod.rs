pub mod http;
pub mod parser;
pub mod plan;
pub mod prompt;
pub mod strategy;
pub mod transport;
pub mod types;
