//! `exorover-engine` – The Rover Brain
//!
//! Owns every piece of mutable rover state and the algorithm that drives the
//! rover across the planet.
//!
//! # Modules
//!
//! - [`rover_state`] – [`RoverState`]: grid bounds, pose, visited and danger
//!   sets, and the minimal-turn planner.
//! - [`session`] – [`RoverSession`]: the planet connection and the state
//!   behind one async lock, exposing one method per primitive action.
//! - [`exploration`] – [`ExplorationEngine`]: depth-first traversal with
//!   backtracking and the configurable [`CrashPolicy`].
//! - [`fleet`] – [`FleetRegistry`]: other robots' last known positions.
//! - [`forwarder`] – [`TelemetryForwarder`]: measurements and updates pushed
//!   towards the ground station over a broadcast channel.
//! - [`logging`] – `tracing` subscriber and optional OTLP export.

pub mod exploration;
pub mod fleet;
pub mod forwarder;
pub mod logging;
pub mod rover_state;
pub mod session;

pub use exploration::{CrashPolicy, ExplorationEngine, ExplorationSummary, Phase, StepOutcome};
pub use fleet::FleetRegistry;
pub use forwarder::{Outbound, OutboundKind, TelemetryForwarder, TelemetryRecord};
pub use rover_state::{Grid, Pose, RoverState, plan_turn};
pub use session::{MoveOutcome, RoverSession, ScanReport};
