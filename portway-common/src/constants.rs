//! Default ports and addresses for Portway services.
//!
//! Use these constants instead of magic numbers so defaults stay consistent
//! across the library, server, and client binaries.

/// Default port for the control-plane listener (start/stop messages).
pub const DEFAULT_CONTROL_PORT: u16 = 7700;

/// Default bind address for the control-plane listener as a string.
pub const DEFAULT_CONTROL_BIND: &str = "0.0.0.0:7700";

/// Default host for the local service the client exposes.
pub const DEFAULT_LOCAL_HOST: &str = "127.0.0.1";
