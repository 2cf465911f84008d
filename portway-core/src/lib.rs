pub mod reconnect;
pub mod relay;
pub mod stream;
pub mod tunnel;

// Re-export specific items for convenience
pub use relay::PlainRelay;
pub use stream::{MuxEndpoint, StreamTable};
pub use tunnel::client::TunnelClient;
pub use tunnel::manager::SessionManager;
pub use tunnel::registry::SessionRegistry;
pub use tunnel::session::{Session, SessionState};
