//! Waypoint library
//!
//! Configuration and the operator loop, exposed for the binary and for
//! integration tests.

pub mod config;
pub mod operator;

pub use config::{load_config, resolve_config_path, ConfigError, LoadedConfig, WaypointConfig};
pub use operator::{Operator, OperatorError, OperatorOptions, OperatorReport, OperatorStep};
