pub mod command;
pub mod config;
pub mod error;
pub mod manager;
pub mod mapping;
pub mod metrics;
pub mod placeholder;
pub mod supervisor;
pub mod telemetry;
pub mod transport;
pub mod workers;
