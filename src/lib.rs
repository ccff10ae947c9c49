//! Time-windowed telemetry queries and incremental sync for an irrigation
//! dashboard.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod database;
pub mod error;
pub mod memory_database;
pub mod schedule;
pub mod schema;
pub mod sensor;
pub mod telemetry;
pub mod validation;
pub mod window;

pub use error::TelemetryError;
