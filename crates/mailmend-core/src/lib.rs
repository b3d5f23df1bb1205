pub mod config;
pub mod db;
pub mod llm;
pub mod migrations;
pub mod repair;
pub mod rules;
pub mod telemetry;

pub use config::Config;
pub use db::Database;
pub use repair::{RepairAgent, RepairError, RepairOutcome, SessionContext, ToolCallRecord};
pub use telemetry::{TelemetryError, TelemetryGuard, init_logging, init_telemetry};
