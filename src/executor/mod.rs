pub mod actuator;
pub mod extract;
pub mod step;
