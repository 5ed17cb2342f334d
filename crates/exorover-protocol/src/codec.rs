//! Planet wire codec.
//!
//! Every message is one JSON object on one line, tagged by its `CMD` field.
//!
//! | Request | Expected response tag(s) |
//! |---|---|
//! | `orbit` | `init` |
//! | `land` | `landed` |
//! | `scan` | `scaned` |
//! | `move` | `moved`, `crashed` |
//! | `rotate` | `rotated` |
//! | `getpos` | `pos` |
//! | `exit` | none – the planet closes the connection |
//!
//! Responses are decoded in two passes: the `CMD` tag is read first and
//! checked against the expected tags, then the body is decoded into the
//! typed variant.  Any failure is reported as [`RoverError::Protocol`] with the
//! raw line attached.

use exorover_types::{Cell, Ground, Heading, Measurement, RoverError, Turn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Temperature reported when a measurement carries no `TEMP` field.
pub const MISSING_TEMPERATURE: f64 = -999.0;

/// `POSITION` object used by `land`, `moved` and `pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    #[serde(rename = "X")]
    pub x: i32,
    #[serde(rename = "Y")]
    pub y: i32,
    #[serde(rename = "DIRECTION")]
    pub direction: Heading,
}

impl Position {
    pub fn new(cell: Cell, direction: Heading) -> Self {
        Self {
            x: cell.x,
            y: cell.y,
            direction,
        }
    }

    pub fn cell(&self) -> Cell {
        Cell::new(self.x, self.y)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// A request sent to the planet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "CMD", rename_all = "lowercase")]
pub enum PlanetCommand {
    Orbit {
        #[serde(rename = "NAME")]
        name: String,
    },
    Land {
        #[serde(rename = "POSITION")]
        position: Position,
    },
    Scan,
    Move,
    Rotate {
        #[serde(rename = "ROTATION")]
        rotation: Turn,
    },
    Getpos,
    Exit,
}

impl PlanetCommand {
    /// The `CMD` tag of this request.
    pub fn tag(&self) -> &'static str {
        match self {
            PlanetCommand::Orbit { .. } => "orbit",
            PlanetCommand::Land { .. } => "land",
            PlanetCommand::Scan => "scan",
            PlanetCommand::Move => "move",
            PlanetCommand::Rotate { .. } => "rotate",
            PlanetCommand::Getpos => "getpos",
            PlanetCommand::Exit => "exit",
        }
    }

    /// Response tags that confirm this request.  Empty for `exit`, which is
    /// never answered.
    pub fn expected_tags(&self) -> &'static [&'static str] {
        match self {
            PlanetCommand::Orbit { .. } => &["init"],
            PlanetCommand::Land { .. } => &["landed"],
            PlanetCommand::Scan => &["scaned"],
            PlanetCommand::Move => &["moved", "crashed"],
            PlanetCommand::Rotate { .. } => &["rotated"],
            PlanetCommand::Getpos => &["pos"],
            PlanetCommand::Exit => &[],
        }
    }

    /// Encode as a single JSON line (without the trailing newline).
    pub fn encode(&self) -> Result<String, RoverError> {
        serde_json::to_string(self)
            .map_err(|e| RoverError::MalformedCommand(format!("cannot encode {}: {e}", self.tag())))
    }

    /// Decode a request line.  Used by the simulated planet.
    pub fn decode(line: &str) -> Result<Self, RoverError> {
        serde_json::from_str(line.trim())
            .map_err(|e| RoverError::MalformedCommand(format!("{e}: {line}")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded planet response.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanetResponse {
    Init { width: u32, height: u32 },
    Landed { measure: Option<Measurement> },
    Scaned { measure: Measurement },
    Moved { position: Option<Position> },
    Crashed,
    Rotated { direction: Heading },
    Pos { position: Position },
}

#[derive(Deserialize)]
struct WireMeasure {
    #[serde(rename = "GROUND", default = "unknown_ground")]
    ground: String,
    #[serde(rename = "TEMP", default = "missing_temperature")]
    temperature: f64,
}

fn unknown_ground() -> String {
    "unknown".to_string()
}

fn missing_temperature() -> f64 {
    MISSING_TEMPERATURE
}

impl From<WireMeasure> for Measurement {
    fn from(wire: WireMeasure) -> Self {
        Measurement {
            ground: Ground::new(wire.ground),
            temperature: wire.temperature,
        }
    }
}

#[derive(Deserialize)]
struct SizeBody {
    #[serde(rename = "WIDTH")]
    width: u32,
    #[serde(rename = "HEIGHT")]
    height: u32,
}

#[derive(Deserialize)]
struct InitBody {
    #[serde(rename = "SIZE")]
    size: SizeBody,
}

#[derive(Deserialize)]
struct LandedBody {
    #[serde(rename = "MEASURE", default)]
    measure: Option<WireMeasure>,
}

#[derive(Deserialize)]
struct ScanedBody {
    #[serde(rename = "MEASURE")]
    measure: WireMeasure,
}

#[derive(Deserialize)]
struct MovedBody {
    #[serde(rename = "POSITION", default)]
    position: Option<Position>,
}

#[derive(Deserialize)]
struct RotatedBody {
    #[serde(rename = "DIRECTION")]
    direction: Heading,
}

/// `pos` comes either nested under `POSITION` or flat on the object.
#[derive(Deserialize)]
#[serde(untagged)]
enum PosBody {
    Nested {
        #[serde(rename = "POSITION")]
        position: Position,
    },
    Flat(Position),
}

impl PlanetResponse {
    /// The `CMD` tag of this response.
    pub fn tag(&self) -> &'static str {
        match self {
            PlanetResponse::Init { .. } => "init",
            PlanetResponse::Landed { .. } => "landed",
            PlanetResponse::Scaned { .. } => "scaned",
            PlanetResponse::Moved { .. } => "moved",
            PlanetResponse::Crashed => "crashed",
            PlanetResponse::Rotated { .. } => "rotated",
            PlanetResponse::Pos { .. } => "pos",
        }
    }

    /// Decode `raw` and check its tag against `expected`.
    ///
    /// # Errors
    ///
    /// [`RoverError::Protocol`] when the line is empty, not JSON, carries no
    /// `CMD`, carries a tag outside `expected` (including the planet's own
    /// `error` reply), or has a body that does not match its tag.
    pub fn decode(raw: &str, expected: &[&str]) -> Result<Self, RoverError> {
        let wanted = expected.join(" or ");
        let protocol = || RoverError::protocol(wanted.clone(), raw);

        let line = raw.trim();
        if line.is_empty() {
            return Err(protocol());
        }
        let value: Value = serde_json::from_str(line).map_err(|_| protocol())?;
        let tag = value
            .get("CMD")
            .and_then(Value::as_str)
            .ok_or_else(protocol)?
            .to_ascii_lowercase();
        if !expected.contains(&tag.as_str()) {
            return Err(protocol());
        }

        let response = match tag.as_str() {
            "init" => {
                let body: InitBody = serde_json::from_value(value).map_err(|_| protocol())?;
                PlanetResponse::Init {
                    width: body.size.width,
                    height: body.size.height,
                }
            }
            "landed" => {
                let body: LandedBody = serde_json::from_value(value).map_err(|_| protocol())?;
                PlanetResponse::Landed {
                    measure: body.measure.map(Measurement::from),
                }
            }
            "scaned" => {
                let body: ScanedBody = serde_json::from_value(value).map_err(|_| protocol())?;
                PlanetResponse::Scaned {
                    measure: body.measure.into(),
                }
            }
            "moved" => {
                let body: MovedBody = serde_json::from_value(value).map_err(|_| protocol())?;
                PlanetResponse::Moved {
                    position: body.position,
                }
            }
            "crashed" => PlanetResponse::Crashed,
            "rotated" => {
                let body: RotatedBody = serde_json::from_value(value).map_err(|_| protocol())?;
                PlanetResponse::Rotated {
                    direction: body.direction,
                }
            }
            "pos" => {
                let position = match serde_json::from_value(value).map_err(|_| protocol())? {
                    PosBody::Nested { position } | PosBody::Flat(position) => position,
                };
                PlanetResponse::Pos { position }
            }
            _ => return Err(protocol()),
        };
        Ok(response)
    }
}
