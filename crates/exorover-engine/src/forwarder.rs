//! [`TelemetryForwarder`] – outbound traffic towards the ground station.
//!
//! Every land/scan measurement becomes a `data` record, every ground-station
//! move a `moved` update, and (optionally) every planet response an echo
//! line.  Messages are published on a [`tokio::sync::broadcast`] channel;
//! the ground-station bridge subscribes and writes them to its connection.
//! Publishing never blocks: with no subscriber attached the message is
//! dropped.
//!
//! | Kind | Wire line |
//! |---|---|
//! | [`OutboundKind::Data`] | `{"CMD":"data","X":1,"Y":0,"GROUND":"SAND","TEMP":21.5}` |
//! | [`OutboundKind::Moved`] | `{"CMD":"moved","X":1,"Y":0,"DIRECTION":"EAST"}` |
//! | [`OutboundKind::PlanetEcho`] | `[PLANET-RESPONSE] <raw planet line>` |

use chrono::{DateTime, Utc};
use exorover_types::{Cell, Heading, Measurement, RoverError};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default channel capacity (messages buffered for a slow ground station
/// before the oldest are dropped).
const DEFAULT_CAPACITY: usize = 256;

/// Prefix of planet-response echo lines.
pub const PLANET_ECHO_PREFIX: &str = "[PLANET-RESPONSE]";

/// One measurement, tied to the cell it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub x: i32,
    pub y: i32,
    pub ground_type: String,
    pub temperature: f64,
}

impl TelemetryRecord {
    pub fn new(cell: Cell, measure: &Measurement) -> Self {
        Self {
            x: cell.x,
            y: cell.y,
            ground_type: measure.ground.as_str().to_string(),
            temperature: measure.temperature,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundKind {
    Data(TelemetryRecord),
    Moved { cell: Cell, heading: Heading },
    PlanetEcho(String),
}

/// An outbound message.  `id` and `timestamp` are for logs only; the ground
/// station receives [`Outbound::to_wire`].
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: OutboundKind,
}

#[derive(Serialize)]
#[serde(tag = "CMD", rename_all = "lowercase")]
enum WireMessage<'a> {
    Data {
        #[serde(rename = "X")]
        x: i32,
        #[serde(rename = "Y")]
        y: i32,
        #[serde(rename = "GROUND")]
        ground: &'a str,
        #[serde(rename = "TEMP")]
        temp: f64,
    },
    Moved {
        #[serde(rename = "X")]
        x: i32,
        #[serde(rename = "Y")]
        y: i32,
        #[serde(rename = "DIRECTION")]
        direction: Heading,
    },
}

impl Outbound {
    pub fn new(kind: OutboundKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The line sent to the ground station.
    pub fn to_wire(&self) -> Result<String, RoverError> {
        let wire = match &self.kind {
            OutboundKind::Data(record) => WireMessage::Data {
                x: record.x,
                y: record.y,
                ground: &record.ground_type,
                temp: record.temperature,
            },
            OutboundKind::Moved { cell, heading } => WireMessage::Moved {
                x: cell.x,
                y: cell.y,
                direction: *heading,
            },
            OutboundKind::PlanetEcho(raw) => return Ok(format!("{PLANET_ECHO_PREFIX} {raw}")),
        };
        serde_json::to_string(&wire)
            .map_err(|e| RoverError::MalformedCommand(format!("cannot encode outbound message: {e}")))
    }
}

/// Fire-and-forget publisher of outbound ground-station traffic.  Clones
/// share the same channel.
#[derive(Debug, Clone)]
pub struct TelemetryForwarder {
    sender: broadcast::Sender<Outbound>,
    echo_planet_responses: bool,
}

impl Default for TelemetryForwarder {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, true)
    }
}

impl TelemetryForwarder {
    pub fn new(capacity: usize, echo_planet_responses: bool) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            echo_planet_responses,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.sender.subscribe()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }

    /// Publish a `data` record for `cell`.  Returns `false` (and warns) when
    /// no ground station is attached.
    pub fn forward_measurement(&self, cell: Cell, measure: &Measurement) -> bool {
        let record = TelemetryRecord::new(cell, measure);
        let delivered = self.publish(OutboundKind::Data(record));
        if !delivered {
            warn!(x = cell.x, y = cell.y, "no ground station attached; telemetry dropped");
        }
        delivered
    }

    /// Publish a `moved` update after a ground-station move.
    pub fn announce_move(&self, cell: Cell, heading: Heading) -> bool {
        self.publish(OutboundKind::Moved { cell, heading })
    }

    /// Echo a raw planet response when echoing is enabled.
    pub fn echo_planet_response(&self, raw: &str) -> bool {
        if !self.echo_planet_responses {
            return false;
        }
        self.publish(OutboundKind::PlanetEcho(raw.to_string()))
    }

    fn publish(&self, kind: OutboundKind) -> bool {
        let message = Outbound::new(kind);
        let id = message.id;
        match self.sender.send(message) {
            Ok(receivers) => {
                debug!(%id, receivers, "outbound message published");
                true
            }
            Err(_) => false,
        }
    }
}
