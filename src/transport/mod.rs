//! Engine subprocess and socket management.

pub mod session;
/// BCVTB socket configuration artifact.
pub mod socket_config;
pub mod types;

pub use session::TransportSession;
pub use socket_config::SocketConfig;
pub use types::{
    CancelToken, LaunchSpec, Transport, TransportError, TransportSettings, TransportState,
};
