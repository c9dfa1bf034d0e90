pub mod config;
pub mod responder;
pub mod roster;
pub mod telemetry;
