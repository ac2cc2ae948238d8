pub mod backoff;
pub mod client;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod monitor;
pub mod repair;
pub mod telemetry;
pub mod timeout;
pub mod types;
