//! `exorover-ground` – The Ground-Station Channel
//!
//! - [`command`] – [`GroundCommand`]: decoding of plain and JSON command lines.
//! - [`link`] – [`GroundLink`]: the TCP connection and `register` handshake.
//! - [`bridge`] – [`GroundStationBridge`]: dispatches commands to the rover
//!   session and writes outbound telemetry back to the station.

pub mod bridge;
pub mod command;
pub mod link;

pub use bridge::{Flow, GroundStationBridge};
pub use command::GroundCommand;
pub use link::GroundLink;
