pub mod builtins;
pub mod chart;
pub mod engine;
