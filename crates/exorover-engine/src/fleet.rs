//! Positions of the other rovers sharing the planet.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use exorover_types::{Cell, OtherRobotPosition};
use tracing::debug;

/// Last known cell of every other robot, keyed by name.
///
/// Written by the ground-station bridge (`update`), read by the move planner.
/// Guarded independently of the planet session so updates never wait on a
/// planet round trip.  Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct FleetRegistry {
    positions: Arc<RwLock<HashMap<String, Cell>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` at `cell`; the latest update wins.
    pub fn update(&self, name: impl Into<String>, cell: Cell) {
        let name = name.into();
        debug!(robot = %name, x = cell.x, y = cell.y, "fleet position updated");
        self.positions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, cell);
    }

    pub fn position(&self, name: &str) -> Option<Cell> {
        self.positions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
    }

    /// Name of a robot standing on `cell`, if any.
    pub fn occupant(&self, cell: Cell) -> Option<String> {
        self.positions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(_, c)| **c == cell)
            .map(|(name, _)| name.clone())
    }

    pub fn is_occupied(&self, cell: Cell) -> bool {
        self.occupant(cell).is_some()
    }

    /// All known positions, sorted by name.
    pub fn snapshot(&self) -> Vec<OtherRobotPosition> {
        let mut all: Vec<OtherRobotPosition> = self
            .positions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(name, cell)| OtherRobotPosition::new(name.clone(), *cell))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.positions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
