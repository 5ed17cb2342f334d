//! `exorover-protocol` – The Planet Link
//!
//! Everything needed to talk to the planet simulation server, and nothing
//! about what the rover does with the answers.
//!
//! # Modules
//!
//! - [`codec`] – [`PlanetCommand`] / [`PlanetResponse`]: the single-line JSON
//!   wire format, decoded with `serde_json` and validated against the tags a
//!   command expects.
//! - [`transport`] – [`LineTransport`]: the line-oriented transport trait, and
//!   [`StreamTransport`], its implementation over any tokio byte stream.
//! - [`client`] – [`ProtocolClient`]: strict one-request/one-response
//!   exchange on top of a [`LineTransport`].
//! - [`sim`] – [`SimPlanet`]: an in-process planet so the full stack runs in
//!   tests and CI without a server.

pub mod client;
pub mod codec;
pub mod sim;
pub mod transport;

pub use client::{ProtocolClient, Reply};
pub use codec::{PlanetCommand, PlanetResponse, Position};
pub use sim::{SimJournal, SimPlanet};
pub use transport::{LineTransport, StreamTransport};
