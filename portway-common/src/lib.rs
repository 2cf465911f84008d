//! Common utilities and types for Portway

pub mod config;
pub mod constants;
pub mod error;

pub use config::{LimitsConfig, ReconnectConfig, TimeoutsConfig};
pub use constants::{DEFAULT_CONTROL_BIND, DEFAULT_CONTROL_PORT, DEFAULT_LOCAL_HOST};
pub use error::{Result, TunnelError};
