//! Co-simulation wire protocol.

pub mod packet;

pub use packet::{CodecError, Flag, PROTOCOL_VERSION, Packet, decode, encode};
