//! Rover pose, grid bounds and the visited/danger bookkeeping.
//!
//! [`RoverState`] is a plain state machine: it never talks to the planet.
//! The session applies a transition only after the planet has confirmed the
//! matching command, so the state always describes what the planet believes.

use std::collections::{HashMap, HashSet};

use exorover_types::{Cell, Ground, Heading, RoverError, Turn};

/// Immutable grid bounds, fixed by the `init` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    width: u32,
    height: u32,
}

impl Grid {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn contains(&self, cell: Cell) -> bool {
        cell.x >= 0
            && cell.y >= 0
            && (cell.x as u32) < self.width
            && (cell.y as u32) < self.height
    }

    /// `Err(RoverError::Bounds)` when `cell` lies outside the grid.
    pub fn check(&self, cell: Cell) -> Result<(), RoverError> {
        if self.contains(cell) {
            Ok(())
        } else {
            Err(RoverError::Bounds {
                cell,
                width: self.width,
                height: self.height,
            })
        }
    }

    /// In-grid neighbours of `cell` in N, E, S, W order.
    pub fn neighbours(&self, cell: Cell) -> impl Iterator<Item = Cell> + '_ {
        Heading::ALL
            .into_iter()
            .map(move |heading| cell.offset(heading))
            .filter(|next| self.contains(*next))
    }
}

/// Where the rover stands and which way it faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pose {
    pub cell: Cell,
    pub heading: Heading,
}

impl Pose {
    pub fn new(cell: Cell, heading: Heading) -> Self {
        Self { cell, heading }
    }
}

/// Shortest rotation sequence from `from` to `to`: never more than two turns,
/// and a half turn is always `[RIGHT, RIGHT]`.
pub fn plan_turn(from: Heading, to: Heading) -> Vec<Turn> {
    match (to.index() + 4 - from.index()) % 4 {
        0 => Vec::new(),
        1 => vec![Turn::Right],
        2 => vec![Turn::Right, Turn::Right],
        _ => vec![Turn::Left],
    }
}

/// The rover's view of the planet.
#[derive(Debug, Clone)]
pub struct RoverState {
    grid: Grid,
    pose: Option<Pose>,
    visited: HashSet<Cell>,
    danger: HashSet<Cell>,
    terrain: HashMap<Cell, Ground>,
    failed_attempts: HashMap<Cell, u32>,
}

impl RoverState {
    /// Fresh, unlanded state for `grid`.
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            pose: None,
            visited: HashSet::new(),
            danger: HashSet::new(),
            terrain: HashMap::new(),
            failed_attempts: HashMap::new(),
        }
    }

    pub fn grid(&self) -> Grid {
        self.grid
    }

    pub fn pose(&self) -> Option<Pose> {
        self.pose
    }

    pub fn is_landed(&self) -> bool {
        self.pose.is_some()
    }

    /// Current pose, or [`RoverError::NotLanded`].
    pub fn require_pose(&self) -> Result<Pose, RoverError> {
        self.pose.ok_or(RoverError::NotLanded)
    }

    pub fn is_visited(&self, cell: Cell) -> bool {
        self.visited.contains(&cell)
    }

    pub fn is_dangerous(&self, cell: Cell) -> bool {
        self.danger.contains(&cell)
    }

    pub fn visited(&self) -> &HashSet<Cell> {
        &self.visited
    }

    pub fn danger(&self) -> &HashSet<Cell> {
        &self.danger
    }

    /// Last ground type observed for `cell`.
    pub fn ground_at(&self, cell: Cell) -> Option<&Ground> {
        self.terrain.get(&cell)
    }

    pub fn failed_attempts(&self, cell: Cell) -> u32 {
        self.failed_attempts.get(&cell).copied().unwrap_or(0)
    }

    // ── transitions ──────────────────────────────────────────────────────────

    /// Commit a confirmed landing.  On error the state stays unlanded.
    pub fn apply_landing(&mut self, cell: Cell, heading: Heading) -> Result<(), RoverError> {
        if self.pose.is_some() {
            return Err(RoverError::InvalidState("rover has already landed".to_string()));
        }
        self.grid.check(cell)?;
        self.pose = Some(Pose::new(cell, heading));
        self.mark_visited(cell);
        Ok(())
    }

    /// Rotations needed to face `target` from the current heading.
    pub fn plan_turn(&self, target: Heading) -> Result<Vec<Turn>, RoverError> {
        let pose = self.require_pose()?;
        Ok(plan_turn(pose.heading, target))
    }

    /// Commit a confirmed one-cell move.  The heading is unchanged.
    pub fn apply_move(&mut self, cell: Cell) -> Result<(), RoverError> {
        let pose = self.require_pose()?;
        self.grid.check(cell)?;
        if pose.cell.heading_to(cell).is_none() {
            return Err(RoverError::NonAdjacentMove {
                from: pose.cell,
                to: cell,
            });
        }
        self.pose = Some(Pose::new(cell, pose.heading));
        self.mark_visited(cell);
        Ok(())
    }

    /// Commit a confirmed rotation.
    pub fn apply_rotation(&mut self, heading: Heading) -> Result<(), RoverError> {
        let pose = self.require_pose()?;
        self.pose = Some(Pose::new(pose.cell, heading));
        Ok(())
    }

    /// Commit the pose reported by `getpos`.
    pub fn apply_position(&mut self, cell: Cell, heading: Heading) -> Result<(), RoverError> {
        self.require_pose()?;
        self.grid.check(cell)?;
        self.pose = Some(Pose::new(cell, heading));
        self.mark_visited(cell);
        Ok(())
    }

    /// Neighbour in the current heading, `None` at the grid edge or before
    /// landing.
    pub fn cell_ahead(&self) -> Option<Cell> {
        let pose = self.pose?;
        let ahead = pose.cell.offset(pose.heading);
        self.grid.contains(ahead).then_some(ahead)
    }

    /// Record a scan of `cell`.  Hazard ground marks the cell dangerous;
    /// safe ground is only remembered, the cell counts as visited once the
    /// rover has entered it.
    pub fn record_scan(&mut self, cell: Cell, ground: Ground) {
        if ground.is_hazard() {
            self.mark_danger(cell);
        }
        self.terrain.insert(cell, ground);
    }

    /// Mark `cell` dangerous.  Returns `true` if it was not already marked.
    pub fn mark_danger(&mut self, cell: Cell) -> bool {
        self.danger.insert(cell)
    }

    /// Count one more crashed or blocked move towards `cell` and return the
    /// new total.
    pub fn record_failure(&mut self, cell: Cell) -> u32 {
        let count = self.failed_attempts.entry(cell).or_insert(0);
        *count += 1;
        *count
    }

    /// First neighbour of `cell` in N, E, S, W order that is neither visited
    /// nor dangerous.
    pub fn first_unvisited_safe_neighbour(&self, cell: Cell) -> Option<Cell> {
        self.grid
            .neighbours(cell)
            .find(|next| !self.is_visited(*next) && !self.is_dangerous(*next))
    }

    fn mark_visited(&mut self, cell: Cell) {
        if !self.danger.contains(&cell) {
            self.visited.insert(cell);
        }
    }
}
