//! Co-simulation controller for building-energy simulation engines.
//!
//! Drives an external engine subprocess one timestep at a time over the
//! BCVTB text protocol, translating named points to the positional vectors
//! the engine exchanges.

pub mod config;
/// Session registry and internal-clock driver.
pub mod dispatch;
/// Trajectory export.
pub mod io {
    pub mod export;
}
pub mod model;
pub mod points;
/// Packet codec.
pub mod protocol;
pub mod run;
pub mod transport;
