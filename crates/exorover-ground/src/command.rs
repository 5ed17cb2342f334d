//! Ground-station command decoding.
//!
//! One command per line, in any of three shapes:
//!
//! | Shape | Example |
//! |---|---|
//! | plain, pipe-delimited | `land\|3\|4\|EAST`, `update\|rover2\|1\|2`, `scan` |
//! | JSON envelope | `{"CMD":"land","MESSAGE":"land\|3\|4\|EAST"}` |
//! | JSON with position | `{"CMD":"land","POSITION":{"X":3,"Y":4,"DIRECTION":"EAST"}}` |
//!
//! Verbs are case-insensitive.

use std::str::FromStr;

use exorover_types::{Cell, Heading, RoverError};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroundCommand {
    Land { cell: Cell, heading: Heading },
    Scan,
    /// One cell forward in the current heading.
    Move,
    RotateRight,
    RotateLeft,
    Explore,
    GetPos,
    /// Another robot's position; only touches the fleet registry.
    Update { name: String, cell: Cell },
    Disconnect,
}

#[derive(Deserialize)]
struct WirePosition {
    #[serde(rename = "X")]
    x: i32,
    #[serde(rename = "Y")]
    y: i32,
    #[serde(rename = "DIRECTION")]
    direction: String,
}

impl GroundCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            GroundCommand::Land { .. } => "land",
            GroundCommand::Scan => "scan",
            GroundCommand::Move => "move",
            GroundCommand::RotateRight => "rotateright",
            GroundCommand::RotateLeft => "rotateleft",
            GroundCommand::Explore => "explore",
            GroundCommand::GetPos => "getpos",
            GroundCommand::Update { .. } => "update",
            GroundCommand::Disconnect => "disconnect",
        }
    }

    /// Decode one ground-station line.
    ///
    /// # Errors
    ///
    /// [`RoverError::UnknownCommand`] for an unrecognised verb,
    /// [`RoverError::MalformedCommand`] for a recognised verb with a bad
    /// payload or for unreadable JSON.
    pub fn parse(line: &str) -> Result<Self, RoverError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(RoverError::MalformedCommand("empty line".to_string()));
        }
        if line.starts_with('{') {
            Self::parse_json(line)
        } else {
            let parts: Vec<&str> = line.split('|').map(str::trim).collect();
            Self::from_parts(parts[0], &parts[1..])
        }
    }

    fn parse_json(line: &str) -> Result<Self, RoverError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| RoverError::MalformedCommand(format!("invalid JSON ({e}): {line}")))?;
        let verb = value
            .get("CMD")
            .and_then(Value::as_str)
            .ok_or_else(|| RoverError::MalformedCommand(format!("missing CMD: {line}")))?;

        if let Some(message) = value.get("MESSAGE").and_then(Value::as_str) {
            let parts: Vec<&str> = message.split('|').map(str::trim).collect();
            // The envelope repeats the verb as the first MESSAGE field.
            let args = if parts[0].eq_ignore_ascii_case(verb) {
                &parts[1..]
            } else {
                &parts[..]
            };
            return Self::from_parts(verb, args);
        }

        if let Some(position) = value.get("POSITION") {
            let position: WirePosition = serde_json::from_value(position.clone())
                .map_err(|e| RoverError::MalformedCommand(format!("bad POSITION ({e}): {line}")))?;
            let x = position.x.to_string();
            let y = position.y.to_string();
            return Self::from_parts(verb, &[x.as_str(), y.as_str(), position.direction.as_str()]);
        }

        Self::from_parts(verb, &[])
    }

    fn from_parts(verb: &str, args: &[&str]) -> Result<Self, RoverError> {
        let verb = verb.trim().to_ascii_lowercase();
        let command = match verb.as_str() {
            "land" => {
                let [x, y, heading] = expect_args::<3>(&verb, args)?;
                GroundCommand::Land {
                    cell: Cell::new(parse_coord(&verb, x)?, parse_coord(&verb, y)?),
                    heading: heading.parse()?,
                }
            }
            "update" => {
                let [name, x, y] = expect_args::<3>(&verb, args)?;
                if name.is_empty() {
                    return Err(RoverError::MalformedCommand(
                        "update: robot name is empty".to_string(),
                    ));
                }
                GroundCommand::Update {
                    name: name.to_string(),
                    cell: Cell::new(parse_coord(&verb, x)?, parse_coord(&verb, y)?),
                }
            }
            "scan" => GroundCommand::Scan,
            "move" => GroundCommand::Move,
            "rotateright" => GroundCommand::RotateRight,
            "rotateleft" => GroundCommand::RotateLeft,
            "explore" => GroundCommand::Explore,
            "getpos" => GroundCommand::GetPos,
            "disconnect" => GroundCommand::Disconnect,
            _ => return Err(RoverError::UnknownCommand(verb)),
        };
        Ok(command)
    }
}

impl FromStr for GroundCommand {
    type Err = RoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn expect_args<'a, const N: usize>(verb: &str, args: &[&'a str]) -> Result<[&'a str; N], RoverError> {
    args.get(..N)
        .and_then(|slice| <[&str; N]>::try_from(slice).ok())
        .ok_or_else(|| {
            RoverError::MalformedCommand(format!(
                "{verb}: expected {N} fields, got {}",
                args.len()
            ))
        })
}

fn parse_coord(verb: &str, raw: &str) -> Result<i32, RoverError> {
    raw.parse()
        .map_err(|_| RoverError::MalformedCommand(format!("{verb}: `{raw}` is not a coordinate")))
}
