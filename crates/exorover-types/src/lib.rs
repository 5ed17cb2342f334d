use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ground markers that mean the cell would destroy the rover.
///
/// The planet reports the void as `NICHTS`; `VOID` is accepted as an alias.
pub const HAZARD_MARKERS: [&str; 3] = ["LAVA", "NICHTS", "VOID"];

/// A grid cell. `x` grows to the east, `y` grows to the south.
///
/// Coordinates are signed; cells off the grid are rejected with
/// [`RoverError::Bounds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring cell one step towards `heading`.
    pub fn offset(self, heading: Heading) -> Self {
        let (dx, dy) = heading.delta();
        Self::new(self.x + dx, self.y + dy)
    }

    /// Heading that leads from `self` to `other` in one step, or `None` when
    /// the cells are not 4-neighbours.
    pub fn heading_to(self, other: Cell) -> Option<Heading> {
        match (other.x - self.x, other.y - self.y) {
            (0, -1) => Some(Heading::North),
            (1, 0) => Some(Heading::East),
            (0, 1) => Some(Heading::South),
            (-1, 0) => Some(Heading::West),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Compass heading of the rover. The declaration order is the clockwise
/// cycle used by the turn planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Heading {
    North,
    East,
    South,
    West,
}

impl Heading {
    /// All headings in clockwise order, starting at north.
    pub const ALL: [Heading; 4] = [Heading::North, Heading::East, Heading::South, Heading::West];

    pub fn index(self) -> usize {
        match self {
            Heading::North => 0,
            Heading::East => 1,
            Heading::South => 2,
            Heading::West => 3,
        }
    }

    /// Inverse of [`Heading::index`]; the index is taken modulo 4.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 4]
    }

    /// Heading after a single 90° turn.
    pub fn rotate(self, turn: Turn) -> Self {
        match turn {
            Turn::Right => Self::from_index(self.index() + 1),
            Turn::Left => Self::from_index(self.index() + 3),
        }
    }

    /// Unit grid step `(dx, dy)` for this heading.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Heading::North => (0, -1),
            Heading::East => (1, 0),
            Heading::South => (0, 1),
            Heading::West => (-1, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Heading::North => "NORTH",
            Heading::East => "EAST",
            Heading::South => "SOUTH",
            Heading::West => "WEST",
        }
    }
}

impl fmt::Display for Heading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Heading {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NORTH" => Ok(Heading::North),
            "EAST" => Ok(Heading::East),
            "SOUTH" => Ok(Heading::South),
            "WEST" => Ok(Heading::West),
            other => Err(RoverError::MalformedCommand(format!("unknown heading `{other}`"))),
        }
    }
}

/// A single 90° rotation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Turn {
    Left,
    Right,
}

/// Ground type as reported by the planet (`SAND`, `FELS`, `LAVA`, …).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ground(String);

impl Ground {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` for lava and void, compared case-insensitively.
    pub fn is_hazard(&self) -> bool {
        HAZARD_MARKERS
            .iter()
            .any(|marker| self.0.eq_ignore_ascii_case(marker))
    }
}

impl fmt::Display for Ground {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One terrain measurement taken on landing or by a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub ground: Ground,
    pub temperature: f64,
}

/// Last known position of another rover sharing the planet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherRobotPosition {
    pub name: String,
    pub cell: Cell,
}

impl OtherRobotPosition {
    pub fn new(name: impl Into<String>, cell: Cell) -> Self {
        Self {
            name: name.into(),
            cell,
        }
    }
}

/// Error type shared by every exorover crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoverError {
    #[error("Bounds Error: {cell} lies outside the {width}x{height} grid")]
    Bounds { cell: Cell, width: u32, height: u32 },

    #[error("Non-Adjacent Move: cannot step from {from} to {to}")]
    NonAdjacentMove { from: Cell, to: Cell },

    #[error("Protocol Error: expected {expected}, got {raw:?}")]
    Protocol { expected: String, raw: String },

    #[error("Connection Error: {0}")]
    Connection(String),

    #[error("Unknown Command: {0}")]
    UnknownCommand(String),

    #[error("Malformed Command: {0}")]
    MalformedCommand(String),

    #[error("Rover has not landed yet")]
    NotLanded,

    #[error("Path Desync: path expects the rover at {expected}, rover is at {actual}")]
    PathDesync { expected: Cell, actual: Cell },

    #[error("Backtrack Failed: could not return to {target}: {reason}")]
    BacktrackFailed { target: Cell, reason: String },

    #[error("Invalid State: {0}")]
    InvalidState(String),

    #[error("Config Error: {0}")]
    Config(String),
}

impl RoverError {
    /// Build a [`RoverError::Protocol`] for an unexpected response line.
    pub fn protocol(expected: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Protocol {
            expected: expected.into(),
            raw: raw.into(),
        }
    }

    /// Fatal errors stop the task that observes them; the rest only abort
    /// the operation in progress.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::Connection(_)
                | Self::PathDesync { .. }
                | Self::BacktrackFailed { .. }
        )
    }

    /// Errors that leave the planet connection unusable for every task, not
    /// only the one that observed them.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Connection(_))
    }
}

impl From<std::io::Error> for RoverError {
    fn from(e: std::io::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_rotation_is_cyclic() {
        for heading in Heading::ALL {
            assert_eq!(heading.rotate(Turn::Right).rotate(Turn::Left), heading);
            let full_turn = (0..4).fold(heading, |h, _| h.rotate(Turn::Right));
            assert_eq!(full_turn, heading);
        }
        assert_eq!(Heading::North.rotate(Turn::Left), Heading::West);
        assert_eq!(Heading::West.rotate(Turn::Right), Heading::North);
    }

    #[test]
    fn heading_wire_names_are_uppercase() {
        let json = serde_json::to_string(&Heading::South).unwrap();
        assert_eq!(json, "\"SOUTH\"");
        let back: Heading = serde_json::from_str("\"WEST\"").unwrap();
        assert_eq!(back, Heading::West);
        assert_eq!(serde_json::to_string(&Turn::Left).unwrap(), "\"LEFT\"");
    }

    #[test]
    fn heading_parses_case_insensitively() {
        assert_eq!("east".parse::<Heading>().unwrap(), Heading::East);
        assert_eq!(" North ".parse::<Heading>().unwrap(), Heading::North);
        assert!(matches!(
            "up".parse::<Heading>(),
            Err(RoverError::MalformedCommand(_))
        ));
    }

    #[test]
    fn heading_to_only_accepts_neighbours() {
        let origin = Cell::new(2, 2);
        assert_eq!(origin.heading_to(Cell::new(2, 1)), Some(Heading::North));
        assert_eq!(origin.heading_to(Cell::new(3, 2)), Some(Heading::East));
        assert_eq!(origin.heading_to(Cell::new(2, 3)), Some(Heading::South));
        assert_eq!(origin.heading_to(Cell::new(1, 2)), Some(Heading::West));
        assert_eq!(origin.heading_to(Cell::new(3, 3)), None);
        assert_eq!(origin.heading_to(origin), None);
        assert_eq!(origin.heading_to(Cell::new(4, 2)), None);
    }

    #[test]
    fn offset_matches_heading_to() {
        let origin = Cell::new(5, 5);
        for heading in Heading::ALL {
            assert_eq!(origin.heading_to(origin.offset(heading)), Some(heading));
        }
    }

    #[test]
    fn hazard_markers_are_case_insensitive() {
        assert!(Ground::new("LAVA").is_hazard());
        assert!(Ground::new("lava").is_hazard());
        assert!(Ground::new("NICHTS").is_hazard());
        assert!(Ground::new("void").is_hazard());
        assert!(!Ground::new("SAND").is_hazard());
        assert!(!Ground::new("unknown").is_hazard());
    }

    #[test]
    fn rover_error_display() {
        let err = RoverError::Bounds {
            cell: Cell::new(4, 0),
            width: 4,
            height: 3,
        };
        assert!(err.to_string().contains("(4, 0)"));
        assert!(err.to_string().contains("4x3"));

        let err = RoverError::protocol("landed", "{\"CMD\":\"crashed\"}");
        assert!(err.to_string().contains("landed"));
        assert!(err.is_fatal());
        assert!(!RoverError::UnknownCommand("dance".into()).is_fatal());
    }

    #[test]
    fn exploration_errors_are_not_link_failures() {
        let desync = RoverError::PathDesync {
            expected: Cell::new(0, 0),
            actual: Cell::new(1, 0),
        };
        let backtrack = RoverError::BacktrackFailed {
            target: Cell::new(0, 0),
            reason: "blocked by another robot".into(),
        };
        assert!(desync.is_fatal() && !desync.is_link_failure());
        assert!(backtrack.is_fatal() && !backtrack.is_link_failure());
        assert!(RoverError::Connection("reset".into()).is_link_failure());
        assert!(RoverError::protocol("moved", "").is_link_failure());
        assert!(!RoverError::NotLanded.is_link_failure());
    }
}
