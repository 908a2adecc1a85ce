pub mod cli;
pub mod probe;
pub mod scenarios;
pub mod server;
pub mod telemetry;
