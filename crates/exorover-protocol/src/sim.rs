//! In-process simulated planet for tests and CI.
//!
//! [`SimPlanet`] answers the planet protocol from an in-memory terrain map so
//! the whole rover stack can run headless, without the simulation server.
//! Like the real planet it destroys a rover that drives onto lava or into the
//! void; the [`SimJournal`] records every command and every cell entered so
//! tests can assert on what the rover actually did.
//!
//! ```rust,no_run
//! use exorover_protocol::{ProtocolClient, SimPlanet};
//! use exorover_types::{Cell, Ground};
//!
//! # async fn demo() {
//! let planet = SimPlanet::new(3, 1).with_ground(Cell::new(2, 0), Ground::new("LAVA"));
//! let (transport, journal) = planet.spawn();
//! let client = ProtocolClient::new(transport);
//! # let _ = (client, journal);
//! # }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use exorover_types::{Cell, Ground, Heading, RoverError, Turn};
use serde_json::json;
use tokio::io::DuplexStream;
use tracing::debug;

use crate::codec::{PlanetCommand, Position};
use crate::transport::{LineTransport, StreamTransport};

const DEFAULT_GROUND: &str = "SAND";
const DEFAULT_TEMPERATURE: f64 = 21.5;

// ────────────────────────────────────────────────────────────────────────────
// Journal
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct JournalInner {
    commands: Vec<PlanetCommand>,
    entered: Vec<Cell>,
    destroyed_at: Option<Cell>,
}

/// Shared record of everything a [`SimPlanet`] observed.  Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SimJournal {
    inner: Arc<Mutex<JournalInner>>,
}

impl SimJournal {
    fn with<R>(&self, f: impl FnOnce(&mut JournalInner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Every command received, in order.
    pub fn commands(&self) -> Vec<PlanetCommand> {
        self.with(|j| j.commands.clone())
    }

    /// Number of received commands with the given `CMD` tag.
    pub fn count(&self, tag: &str) -> usize {
        self.with(|j| j.commands.iter().filter(|c| c.tag() == tag).count())
    }

    /// Cells the rover stood on, in order: the landing cell, then one entry
    /// per confirmed move.
    pub fn entered(&self) -> Vec<Cell> {
        self.with(|j| j.entered.clone())
    }

    /// The hazard cell the rover drove into, if it did.
    pub fn destroyed_at(&self) -> Option<Cell> {
        self.with(|j| j.destroyed_at)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Planet
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Pose {
    cell: Cell,
    heading: Heading,
}

/// A rectangular planet with configurable terrain.
///
/// Unconfigured cells are `SAND` at 21.5°.  Cells outside the grid scan as
/// `NICHTS`.
pub struct SimPlanet {
    width: u32,
    height: u32,
    terrain: HashMap<Cell, Ground>,
    temperatures: HashMap<Cell, f64>,
    obstacles: HashSet<Cell>,
    overrides: HashMap<String, VecDeque<String>>,
    rover: Option<Pose>,
    destroyed: bool,
    journal: SimJournal,
}

impl SimPlanet {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            terrain: HashMap::new(),
            temperatures: HashMap::new(),
            obstacles: HashSet::new(),
            overrides: HashMap::new(),
            rover: None,
            destroyed: false,
            journal: SimJournal::default(),
        }
    }

    /// Set the ground type of `cell`.
    pub fn with_ground(mut self, cell: Cell, ground: Ground) -> Self {
        self.terrain.insert(cell, ground);
        self
    }

    pub fn with_temperature(mut self, cell: Cell, temperature: f64) -> Self {
        self.temperatures.insert(cell, temperature);
        self
    }

    /// Something (e.g. a parked robot) sits on `cell`: it scans as normal
    /// ground but every move into it is answered with `crashed`.
    pub fn with_obstacle(mut self, cell: Cell) -> Self {
        self.obstacles.insert(cell);
        self
    }

    /// Answer the next command tagged `tag` with `raw` verbatim, without
    /// touching the planet state.  Overrides for the same tag queue up.
    pub fn with_reply_override(mut self, tag: &str, raw: impl Into<String>) -> Self {
        self.overrides
            .entry(tag.to_string())
            .or_default()
            .push_back(raw.into());
        self
    }

    pub fn journal(&self) -> SimJournal {
        self.journal.clone()
    }

    fn in_bounds(&self, cell: Cell) -> bool {
        cell.x >= 0 && cell.y >= 0 && (cell.x as u32) < self.width && (cell.y as u32) < self.height
    }

    fn ground_at(&self, cell: Cell) -> Ground {
        if !self.in_bounds(cell) {
            return Ground::new("NICHTS");
        }
        self.terrain
            .get(&cell)
            .cloned()
            .unwrap_or_else(|| Ground::new(DEFAULT_GROUND))
    }

    fn measure_at(&self, cell: Cell) -> serde_json::Value {
        let temperature = self
            .temperatures
            .get(&cell)
            .copied()
            .unwrap_or(DEFAULT_TEMPERATURE);
        json!({ "GROUND": self.ground_at(cell).as_str(), "TEMP": temperature })
    }

    fn error(message: impl std::fmt::Display) -> String {
        json!({ "CMD": "error", "ERROR": message.to_string() }).to_string()
    }

    fn position_json(pose: Pose) -> serde_json::Value {
        json!({ "X": pose.cell.x, "Y": pose.cell.y, "DIRECTION": pose.heading.as_str() })
    }

    /// Answer one command.  Returns `None` for `exit`, after which the planet
    /// closes the connection.
    pub fn handle(&mut self, command: &PlanetCommand) -> Option<String> {
        self.journal.with(|j| j.commands.push(command.clone()));

        if let Some(raw) = self
            .overrides
            .get_mut(command.tag())
            .and_then(VecDeque::pop_front)
        {
            return Some(raw);
        }

        if self.destroyed && !matches!(command, PlanetCommand::Exit) {
            return Some(Self::error("robot destroyed"));
        }

        let reply = match command {
            PlanetCommand::Orbit { .. } => {
                json!({ "CMD": "init", "SIZE": { "WIDTH": self.width, "HEIGHT": self.height } })
                    .to_string()
            }
            PlanetCommand::Land { position } => self.land(*position),
            PlanetCommand::Scan => match self.rover {
                Some(pose) => {
                    let ahead = pose.cell.offset(pose.heading);
                    json!({ "CMD": "scaned", "MEASURE": self.measure_at(ahead) }).to_string()
                }
                None => Self::error("robot not landed"),
            },
            PlanetCommand::Move => self.drive(),
            PlanetCommand::Rotate { rotation } => self.rotate(*rotation),
            PlanetCommand::Getpos => match self.rover {
                Some(pose) => json!({ "CMD": "pos", "POSITION": Self::position_json(pose) }).to_string(),
                None => Self::error("robot not landed"),
            },
            PlanetCommand::Exit => return None,
        };
        Some(reply)
    }

    fn land(&mut self, position: Position) -> String {
        let cell = position.cell();
        if self.rover.is_some() {
            return Self::error("robot already landed");
        }
        if !self.in_bounds(cell) {
            return Self::error(format!("landing position {cell} is outside the planet"));
        }
        if self.ground_at(cell).is_hazard() {
            self.destroyed = true;
            self.journal.with(|j| j.destroyed_at = Some(cell));
            return Self::error(format!("robot destroyed on landing at {cell}"));
        }
        self.rover = Some(Pose {
            cell,
            heading: position.direction,
        });
        self.journal.with(|j| j.entered.push(cell));
        json!({ "CMD": "landed", "MEASURE": self.measure_at(cell) }).to_string()
    }

    fn drive(&mut self) -> String {
        let Some(pose) = self.rover else {
            return Self::error("robot not landed");
        };
        let target = pose.cell.offset(pose.heading);
        if !self.in_bounds(target) || self.obstacles.contains(&target) {
            return json!({ "CMD": "crashed" }).to_string();
        }
        if self.ground_at(target).is_hazard() {
            self.destroyed = true;
            self.journal.with(|j| j.destroyed_at = Some(target));
            return json!({ "CMD": "crashed" }).to_string();
        }
        let moved = Pose {
            cell: target,
            heading: pose.heading,
        };
        self.rover = Some(moved);
        self.journal.with(|j| j.entered.push(target));
        json!({ "CMD": "moved", "POSITION": Self::position_json(moved) }).to_string()
    }

    fn rotate(&mut self, turn: Turn) -> String {
        let Some(pose) = self.rover.as_mut() else {
            return Self::error("robot not landed");
        };
        pose.heading = pose.heading.rotate(turn);
        json!({ "CMD": "rotated", "DIRECTION": pose.heading.as_str() }).to_string()
    }

    /// Serve the protocol over `transport` until `exit` or end of stream.
    pub async fn serve<T: LineTransport>(mut self, mut transport: T) -> Result<(), RoverError> {
        while let Some(line) = transport.recv_line().await? {
            let reply = match PlanetCommand::decode(&line) {
                Ok(command) => match self.handle(&command) {
                    Some(reply) => reply,
                    None => break,
                },
                Err(e) => Self::error(e),
            };
            debug!(" sim <- {line} | -> {reply}");
            transport.send_line(&reply).await?;
        }
        Ok(())
    }

    /// Run the planet on a background task, returning the rover's end of an
    /// in-memory connection and the journal.
    pub fn spawn(self) -> (StreamTransport<DuplexStream>, SimJournal) {
        let (rover_end, planet_end) = tokio::io::duplex(8 * 1024);
        let journal = self.journal();
        tokio::spawn(async move {
            if let Err(e) = self.serve(StreamTransport::new(planet_end)).await {
                debug!("simulated planet stopped: {e}");
            }
        });
        (StreamTransport::new(rover_end), journal)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
