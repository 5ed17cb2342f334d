//! [`ExplorationEngine`] – depth-first coverage of the reachable safe terrain.
//!
//! Starting from the landing cell the engine keeps a path stack.  On every
//! iteration it tries the first neighbour of the stack top, in N, E, S, W
//! order, that is neither visited nor dangerous.  A successful step pushes the
//! neighbour; when no candidate is left the top is popped and the rover
//! physically drives back to the new top.  The loop ends when the stack is
//! empty, at which point every safe cell reachable from the landing cell has
//! been entered exactly once and every hazard seen on the way is marked.
//!
//! Each step is `rotate* → scan → move`, each primitive a separate locked
//! exchange on the [`RoverSession`], so ground-station commands can slip in
//! between primitives.  The engine detects that through
//! [`StepOutcome::Interrupted`] and the per-iteration stack/pose check.

use std::fmt;
use std::time::Duration;

use exorover_types::{Cell, Ground, RoverError};
use tracing::{debug, info, warn};

use crate::rover_state::{Pose, plan_turn};
use crate::session::{MoveOutcome, RoverSession};

/// Extra attempts for a backtrack step that was blocked or interrupted.
const BACKTRACK_RETRIES: u32 = 3;
const BACKTRACK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How crashed or blocked steps are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPolicy {
    /// Mark the target dangerous after the first failure.
    MarkHazard,
    /// Leave the target unmarked so it is retried, and mark it dangerous once
    /// `max_attempts` failures were seen for it.
    Tolerate { max_attempts: u32 },
}

impl Default for CrashPolicy {
    fn default() -> Self {
        CrashPolicy::Tolerate { max_attempts: 2 }
    }
}

impl CrashPolicy {
    fn gives_up_after(self, attempts: u32) -> bool {
        match self {
            CrashPolicy::MarkHazard => true,
            CrashPolicy::Tolerate { max_attempts } => attempts >= max_attempts.max(1),
        }
    }
}

/// Outcome of [`ExplorationEngine::step_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Moved,
    /// The scan reported hazard ground; the target is already in the danger
    /// set and no move was sent.
    Hazard(Ground),
    Crashed,
    Blocked,
    Interrupted,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Moved => f.write_str("moved"),
            StepOutcome::Hazard(ground) => write!(f, "hazard ({ground})"),
            StepOutcome::Crashed => f.write_str("crashed"),
            StepOutcome::Blocked => f.write_str("blocked by another robot"),
            StepOutcome::Interrupted => f.write_str("interrupted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Exploring,
    Finished,
}

/// What an exploration run achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorationSummary {
    /// Cells in the order they were first entered, landing cell first.
    pub visit_order: Vec<Cell>,
    pub visited: usize,
    pub dangers: usize,
    /// Confirmed moves, forward and backtracking.
    pub steps: usize,
    /// `false` when the run stopped because the session stopped running.
    pub completed: bool,
}

pub struct ExplorationEngine {
    session: RoverSession,
    policy: CrashPolicy,
    phase: Phase,
    stack: Vec<Cell>,
    visit_order: Vec<Cell>,
    steps: usize,
}

impl ExplorationEngine {
    pub fn new(session: RoverSession, policy: CrashPolicy) -> Self {
        Self {
            session,
            policy,
            phase: Phase::Idle,
            stack: Vec::new(),
            visit_order: Vec::new(),
            steps: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current DFS path, landing cell first.
    pub fn path(&self) -> &[Cell] {
        &self.stack
    }

    /// Explore everything reachable from the current (landing) cell.
    ///
    /// # Errors
    ///
    /// - [`RoverError::NotLanded`] before landing.
    /// - [`RoverError::InvalidState`] if this engine already ran.
    /// - [`RoverError::PathDesync`] if the rover is moved off the path.
    /// - [`RoverError::BacktrackFailed`] if driving back fails.
    /// - Any protocol or connection error from the session.
    pub async fn explore(&mut self) -> Result<ExplorationSummary, RoverError> {
        if self.phase != Phase::Idle {
            return Err(RoverError::InvalidState(
                "exploration already ran for this landing".to_string(),
            ));
        }
        let start = self.session.pose().await?;

        self.phase = Phase::Exploring;
        self.stack = vec![start.cell];
        self.visit_order = vec![start.cell];
        info!(x = start.cell.x, y = start.cell.y, heading = %start.heading, "exploration started");

        let result = self.run().await;
        self.phase = Phase::Finished;
        let completed = result?;

        let (visited, dangers) = self
            .session
            .inspect(|s| (s.visited().len(), s.danger().len()))
            .await?;
        let summary = ExplorationSummary {
            visit_order: self.visit_order.clone(),
            visited,
            dangers,
            steps: self.steps,
            completed,
        };
        info!(
            visited,
            dangers,
            steps = self.steps,
            completed,
            "exploration finished"
        );
        Ok(summary)
    }

    /// Returns `Ok(false)` when cancelled.
    async fn run(&mut self) -> Result<bool, RoverError> {
        while let Some(&current) = self.stack.last() {
            if !self.session.is_running() {
                warn!("exploration cancelled");
                return Ok(false);
            }
            let pose = self.session.pose().await?;
            if pose.cell != current {
                return Err(RoverError::PathDesync {
                    expected: current,
                    actual: pose.cell,
                });
            }

            let next = self
                .session
                .inspect(|s| s.first_unvisited_safe_neighbour(current))
                .await?;
            match next {
                Some(next) => match self.step_to(next).await? {
                    StepOutcome::Moved => {
                        self.stack.push(next);
                        self.visit_order.push(next);
                    }
                    StepOutcome::Hazard(ground) => {
                        info!(x = next.x, y = next.y, ground = %ground, "hazard marked");
                    }
                    StepOutcome::Crashed | StepOutcome::Blocked => self.record_failure(next).await?,
                    StepOutcome::Interrupted => {
                        warn!(x = next.x, y = next.y, "step interrupted by another command");
                    }
                },
                None => {
                    self.stack.pop();
                    if let Some(&back) = self.stack.last() {
                        self.backtrack(back).await?;
                    }
                }
            }
        }
        Ok(true)
    }

    /// Drive back to `target`.  A step blocked by another robot or
    /// interrupted by a ground-station command is retried a few times before
    /// giving up.
    async fn backtrack(&mut self, target: Cell) -> Result<(), RoverError> {
        debug!(x = target.x, y = target.y, "backtracking");
        let mut retries = 0;
        loop {
            let outcome = match self.step_to(target).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    return Err(RoverError::BacktrackFailed {
                        target,
                        reason: e.to_string(),
                    });
                }
            };
            match outcome {
                StepOutcome::Moved => return Ok(()),
                StepOutcome::Blocked | StepOutcome::Interrupted
                    if retries < BACKTRACK_RETRIES && self.session.is_running() =>
                {
                    retries += 1;
                    debug!(x = target.x, y = target.y, retries, "backtrack step retried");
                    tokio::time::sleep(BACKTRACK_RETRY_DELAY).await;
                }
                other => {
                    return Err(RoverError::BacktrackFailed {
                        target,
                        reason: other.to_string(),
                    });
                }
            }
        }
    }

    async fn record_failure(&mut self, cell: Cell) -> Result<(), RoverError> {
        let policy = self.policy;
        let (attempts, marked) = self
            .session
            .update(|s| {
                let attempts = s.record_failure(cell);
                let marked = policy.gives_up_after(attempts) && s.mark_danger(cell);
                (attempts, marked)
            })
            .await?;
        if marked {
            warn!(x = cell.x, y = cell.y, attempts, "giving up on cell, marked dangerous");
        } else {
            debug!(x = cell.x, y = cell.y, attempts, "step failed, will retry");
        }
        Ok(())
    }

    /// Drive to the adjacent cell `target`: turn, scan, and move unless the
    /// scan reports hazard ground.
    ///
    /// # Errors
    ///
    /// [`RoverError::NonAdjacentMove`] if `target` is not a 4-neighbour of the
    /// rover, [`RoverError::Bounds`] if it lies outside the grid, plus any
    /// session error.
    pub async fn step_to(&mut self, target: Cell) -> Result<StepOutcome, RoverError> {
        let pose = self.session.pose().await?;
        let heading = pose
            .cell
            .heading_to(target)
            .ok_or(RoverError::NonAdjacentMove {
                from: pose.cell,
                to: target,
            })?;
        self.session.grid().await?.check(target)?;

        let mut facing = pose.heading;
        for turn in plan_turn(pose.heading, heading) {
            facing = self.session.rotate(turn).await?;
        }

        if facing != heading {
            debug!(expected = %heading, actual = %facing, "rover faces an unexpected heading");
            return Ok(StepOutcome::Interrupted);
        }

        let scan = self.session.scan().await?;
        if scan.cell != Some(target) {
            debug!(x = target.x, y = target.y, "scan did not cover the target");
            return Ok(StepOutcome::Interrupted);
        }
        if scan.measure.ground.is_hazard() {
            return Ok(StepOutcome::Hazard(scan.measure.ground));
        }

        let expected = Pose::new(pose.cell, heading);
        let outcome = match self.session.advance(expected).await? {
            MoveOutcome::Moved(_) => {
                self.steps += 1;
                StepOutcome::Moved
            }
            MoveOutcome::Crashed => StepOutcome::Crashed,
            MoveOutcome::Blocked => StepOutcome::Blocked,
            MoveOutcome::Interrupted => StepOutcome::Interrupted,
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::fleet::FleetRegistry;
    use crate::forwarder::TelemetryForwarder;
    use exorover_protocol::{ProtocolClient, SimJournal, SimPlanet};
    use exorover_types::Heading;
    use proptest::prelude::*;

    async fn landed_engine(
        planet: SimPlanet,
        landing: Cell,
        heading: Heading,
        policy: CrashPolicy,
    ) -> (ExplorationEngine, RoverSession, SimJournal) {
        let (transport, journal) = planet.spawn();
        let session = RoverSession::orbit(
            ProtocolClient::new(transport),
            "explorer",
            FleetRegistry::new(),
            TelemetryForwarder::new(1024, false),
        )
        .await
        .unwrap();
        session.land(landing, heading).await.unwrap();
        let engine = ExplorationEngine::new(session.clone(), policy);
        (engine, session, journal)
    }

    fn cells(list: &[(i32, i32)]) -> Vec<Cell> {
        list.iter().map(|&(x, y)| Cell::new(x, y)).collect()
    }

    #[tokio::test]
    async fn two_by_two_sand_visit_order() {
        let (mut engine, session, journal) = landed_engine(
            SimPlanet::new(2, 2),
            Cell::new(0, 0),
            Heading::East,
            CrashPolicy::default(),
        )
        .await;
        let summary = engine.explore().await.unwrap();

        assert_eq!(summary.visit_order, cells(&[(0, 0), (1, 0), (1, 1), (0, 1)]));
        assert_eq!(summary.visited, 4);
        assert_eq!(summary.dangers, 0);
        assert!(summary.completed);
        assert!(engine.path().is_empty());
        assert_eq!(engine.phase(), Phase::Finished);
        assert!(session.inspect(|s| s.danger().is_empty()).await.unwrap());
        assert_eq!(journal.destroyed_at(), None);
    }

    #[tokio::test]
    async fn lava_at_the_end_of_a_corridor() {
        let planet = SimPlanet::new(3, 1).with_ground(Cell::new(2, 0), Ground::new("LAVA"));
        let (mut engine, session, journal) =
            landed_engine(planet, Cell::new(0, 0), Heading::East, CrashPolicy::default()).await;
        let summary = engine.explore().await.unwrap();

        let visited = session.inspect(|s| s.visited().clone()).await.unwrap();
        let danger = session.inspect(|s| s.danger().clone()).await.unwrap();
        assert_eq!(visited, cells(&[(0, 0), (1, 0)]).into_iter().collect());
        assert_eq!(danger, cells(&[(2, 0)]).into_iter().collect());
        assert_eq!(summary.visited, 2);
        assert_eq!(summary.dangers, 1);
        assert_eq!(journal.destroyed_at(), None);
        assert!(!journal.entered().contains(&Cell::new(2, 0)));
    }

    #[tokio::test]
    async fn explore_before_landing_fails() {
        let (transport, _journal) = SimPlanet::new(2, 2).spawn();
        let session = RoverSession::orbit(
            ProtocolClient::new(transport),
            "r",
            FleetRegistry::new(),
            TelemetryForwarder::default(),
        )
        .await
        .unwrap();
        let mut engine = ExplorationEngine::new(session, CrashPolicy::default());
        assert_eq!(engine.explore().await, Err(RoverError::NotLanded));
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn explore_runs_once() {
        let (mut engine, _, _) = landed_engine(
            SimPlanet::new(1, 1),
            Cell::new(0, 0),
            Heading::North,
            CrashPolicy::default(),
        )
        .await;
        let summary = engine.explore().await.unwrap();
        assert_eq!(summary.visit_order, cells(&[(0, 0)]));
        assert_eq!(summary.steps, 0);
        assert!(matches!(
            engine.explore().await,
            Err(RoverError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn step_to_rejects_non_adjacent_target() {
        let (mut engine, _, journal) = landed_engine(
            SimPlanet::new(3, 3),
            Cell::new(0, 0),
            Heading::East,
            CrashPolicy::default(),
        )
        .await;
        assert!(matches!(
            engine.step_to(Cell::new(2, 0)).await,
            Err(RoverError::NonAdjacentMove { .. })
        ));
        assert!(matches!(
            engine.step_to(Cell::new(-1, 0)).await,
            Err(RoverError::Bounds { .. })
        ));
        assert_eq!(journal.count("rotate") + journal.count("scan"), 0);
    }

    #[tokio::test]
    async fn step_to_turns_the_short_way() {
        let (mut engine, session, journal) = landed_engine(
            SimPlanet::new(3, 3),
            Cell::new(1, 1),
            Heading::East,
            CrashPolicy::default(),
        )
        .await;
        assert_eq!(engine.step_to(Cell::new(0, 1)).await.unwrap(), StepOutcome::Moved);
        assert_eq!(journal.count("rotate"), 2);
        assert_eq!(engine.step_to(Cell::new(0, 0)).await.unwrap(), StepOutcome::Moved);
        assert_eq!(journal.count("rotate"), 3);
        assert_eq!(
            session.pose().await.unwrap(),
            Pose::new(Cell::new(0, 0), Heading::North)
        );
    }

    #[tokio::test]
    async fn unknown_move_tag_fails_step_without_state_change() {
        let planet = SimPlanet::new(2, 1).with_reply_override("move", r#"{"CMD":"warped"}"#);
        let (mut engine, session, _) =
            landed_engine(planet, Cell::new(0, 0), Heading::East, CrashPolicy::default()).await;
        let err = engine.step_to(Cell::new(1, 0)).await.unwrap_err();
        assert!(matches!(err, RoverError::Protocol { .. }));
        assert_eq!(session.pose().await.unwrap().cell, Cell::new(0, 0));
        assert_eq!(
            session.inspect(|s| s.visited().clone()).await.unwrap(),
            HashSet::from([Cell::new(0, 0)])
        );
    }

    #[tokio::test]
    async fn tolerated_crashes_retry_then_mark() {
        let planet = SimPlanet::new(2, 1).with_obstacle(Cell::new(1, 0));
        let (mut engine, _, journal) = landed_engine(
            planet,
            Cell::new(0, 0),
            Heading::East,
            CrashPolicy::Tolerate { max_attempts: 2 },
        )
        .await;
        let summary = engine.explore().await.unwrap();
        assert_eq!(journal.count("move"), 2);
        assert_eq!(summary.dangers, 1);
        assert_eq!(summary.visited, 1);
    }

    #[tokio::test]
    async fn mark_hazard_policy_gives_up_immediately() {
        let planet = SimPlanet::new(2, 1).with_obstacle(Cell::new(1, 0));
        let (mut engine, _, journal) =
            landed_engine(planet, Cell::new(0, 0), Heading::East, CrashPolicy::MarkHazard).await;
        let summary = engine.explore().await.unwrap();
        assert_eq!(journal.count("move"), 1);
        assert_eq!(summary.dangers, 1);
    }

    #[tokio::test]
    async fn fleet_robot_blocks_without_moving() {
        let (mut engine, session, journal) = landed_engine(
            SimPlanet::new(2, 1),
            Cell::new(0, 0),
            Heading::East,
            CrashPolicy::MarkHazard,
        )
        .await;
        session.fleet().update("rover2", Cell::new(1, 0));
        let summary = engine.explore().await.unwrap();
        assert_eq!(journal.count("move"), 0);
        assert_eq!(summary.visited, 1);
        assert!(session.inspect(|s| s.is_dangerous(Cell::new(1, 0))).await.unwrap());
    }

    #[tokio::test]
    async fn blocked_backtrack_gives_up_without_stopping_the_session() {
        let (mut engine, session, journal) = landed_engine(
            SimPlanet::new(2, 1),
            Cell::new(0, 0),
            Heading::East,
            CrashPolicy::default(),
        )
        .await;
        // Stale report: another robot parked on the landing cell.
        session.fleet().update("rover2", Cell::new(0, 0));
        let err = engine.explore().await.unwrap_err();
        assert!(matches!(
            err,
            RoverError::BacktrackFailed { target, .. } if target == Cell::new(0, 0)
        ));
        assert_eq!(journal.count("move"), 1);
        assert!(session.is_running());
    }

    #[tokio::test]
    async fn blocked_backtrack_waits_for_the_cell_to_clear() {
        let (mut engine, session, journal) = landed_engine(
            SimPlanet::new(2, 1),
            Cell::new(0, 0),
            Heading::East,
            CrashPolicy::default(),
        )
        .await;
        let fleet = session.fleet().clone();
        fleet.update("rover2", Cell::new(0, 0));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            fleet.update("rover2", Cell::new(5, 5));
        });
        let summary = engine.explore().await.unwrap();
        assert!(summary.completed);
        assert_eq!(summary.visit_order, cells(&[(0, 0), (1, 0)]));
        assert_eq!(journal.entered(), cells(&[(0, 0), (1, 0), (0, 0)]));
    }

    #[tokio::test]
    async fn stopped_session_cancels_exploration() {
        let (mut engine, session, journal) = landed_engine(
            SimPlanet::new(3, 3),
            Cell::new(0, 0),
            Heading::East,
            CrashPolicy::default(),
        )
        .await;
        session.stop();
        let summary = engine.explore().await.unwrap();
        assert!(!summary.completed);
        assert_eq!(summary.visit_order, cells(&[(0, 0)]));
        assert_eq!(journal.count("move"), 0);
    }

    #[tokio::test]
    async fn rover_moved_off_path_is_desync() {
        let (mut engine, session, _) = landed_engine(
            SimPlanet::new(3, 3),
            Cell::new(0, 0),
            Heading::South,
            CrashPolicy::default(),
        )
        .await;
        // Simulate a ground-station move before exploration starts walking.
        engine.phase = Phase::Exploring;
        engine.stack = vec![Cell::new(0, 0)];
        session.forward().await.unwrap();
        let err = engine.run().await.unwrap_err();
        assert_eq!(
            err,
            RoverError::PathDesync {
                expected: Cell::new(0, 0),
                actual: Cell::new(0, 1)
            }
        );
    }

    /// Cells reachable from `start` through non-hazard cells.
    fn reachable(width: u32, height: u32, hazards: &HashSet<Cell>, start: Cell) -> HashSet<Cell> {
        let grid = crate::rover_state::Grid::new(width, height);
        let mut seen = HashSet::from([start]);
        let mut frontier = vec![start];
        while let Some(cell) = frontier.pop() {
            for next in grid.neighbours(cell) {
                if !hazards.contains(&next) && seen.insert(next) {
                    frontier.push(next);
                }
            }
        }
        seen
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn dfs_covers_reachable_cells_and_never_enters_hazards(
            width in 1u32..6,
            height in 1u32..6,
            hazard_bits in proptest::collection::vec(any::<bool>(), 36),
            heading_index in 0usize..4,
        ) {
            let hazards: HashSet<Cell> = (0..height as i32)
                .flat_map(|y| (0..width as i32).map(move |x| Cell::new(x, y)))
                .filter(|c| c.x + c.y > 0 && hazard_bits[(c.y * 6 + c.x) as usize])
                .collect();
            let mut planet = SimPlanet::new(width, height);
            for cell in &hazards {
                planet = planet.with_ground(*cell, Ground::new("LAVA"));
            }
            let expected = reachable(width, height, &hazards, Cell::new(0, 0));

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (summary, journal) = runtime.block_on(async {
                let (mut engine, _, journal) = landed_engine(
                    planet,
                    Cell::new(0, 0),
                    Heading::from_index(heading_index),
                    CrashPolicy::default(),
                )
                .await;
                (engine.explore().await.unwrap(), journal)
            });

            prop_assert_eq!(journal.destroyed_at(), None);
            let order: HashSet<Cell> = summary.visit_order.iter().copied().collect();
            prop_assert_eq!(order.len(), summary.visit_order.len());
            prop_assert_eq!(order, expected.clone());
            prop_assert_eq!(summary.visited, expected.len());
            prop_assert!(summary.completed);
            for cell in journal.entered() {
                prop_assert!(!hazards.contains(&cell));
            }
        }
    }
}
