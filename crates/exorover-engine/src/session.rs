//! [`RoverSession`] – the one owner of all mutable rover state.
//!
//! The planet connection and the [`RoverState`] live together in a session
//! core behind a single [`tokio::sync::Mutex`].  Each public primitive
//! (`land`, `rotate`, `scan`, `advance`, `getpos`, `exit`) takes the lock,
//! performs exactly one request/response exchange, commits the confirmed
//! transition and releases the lock.  The exploration engine and the
//! ground-station bridge share a session by cloning it; their primitives
//! interleave but never overlap.
//!
//! A composite step (rotate, scan, move) is therefore *not* atomic.  To stay
//! safe, [`RoverSession::advance`] takes the pose the caller scanned from and
//! refuses to move when the pose has changed in between
//! ([`MoveOutcome::Interrupted`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use exorover_protocol::{PlanetCommand, PlanetResponse, Position, ProtocolClient, Reply};
use exorover_types::{Cell, Heading, Measurement, RoverError, Turn};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fleet::FleetRegistry;
use crate::forwarder::TelemetryForwarder;
use crate::rover_state::{Grid, Pose, RoverState};

/// Result of a single `move` primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The planet confirmed the move; the rover now has this pose.
    Moved(Pose),
    /// The planet answered `crashed`.
    Crashed,
    /// Another robot from the fleet registry stands on the target; no move
    /// was sent.
    Blocked,
    /// The pose no longer matches the caller's expectation; no move was sent.
    Interrupted,
}

/// Result of a `scan` primitive.  `cell` is `None` when the rover faces the
/// grid edge.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub cell: Option<Cell>,
    pub measure: Measurement,
}

struct SessionCore {
    client: ProtocolClient,
    /// `None` once the session has exited.
    state: Option<RoverState>,
}

impl SessionCore {
    fn state(&self) -> Result<&RoverState, RoverError> {
        self.state
            .as_ref()
            .ok_or_else(|| RoverError::InvalidState("session has exited".to_string()))
    }

    fn state_mut(&mut self) -> Result<&mut RoverState, RoverError> {
        self.state
            .as_mut()
            .ok_or_else(|| RoverError::InvalidState("session has exited".to_string()))
    }
}

/// Shared handle to the rover session.  Clones refer to the same session.
#[derive(Clone)]
pub struct RoverSession {
    core: Arc<Mutex<SessionCore>>,
    running: Arc<AtomicBool>,
    name: Arc<str>,
    fleet: FleetRegistry,
    telemetry: TelemetryForwarder,
}

impl RoverSession {
    /// Enter orbit as `name`: the `init` response fixes the grid and creates
    /// a fresh, unlanded [`RoverState`].
    pub async fn orbit(
        mut client: ProtocolClient,
        name: &str,
        fleet: FleetRegistry,
        telemetry: TelemetryForwarder,
    ) -> Result<Self, RoverError> {
        let reply = client
            .send(&PlanetCommand::Orbit {
                name: name.to_string(),
            })
            .await?;
        telemetry.echo_planet_response(&reply.raw);
        let PlanetResponse::Init { width, height } = reply.response else {
            return Err(RoverError::protocol("init", reply.raw));
        };
        info!(robot = name, width, height, "entered orbit");

        Ok(Self {
            core: Arc::new(Mutex::new(SessionCore {
                client,
                state: Some(RoverState::new(Grid::new(width, height))),
            })),
            running: Arc::new(AtomicBool::new(true)),
            name: Arc::from(name),
            fleet,
            telemetry,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fleet(&self) -> &FleetRegistry {
        &self.fleet
    }

    pub fn telemetry(&self) -> &TelemetryForwarder {
        &self.telemetry
    }

    // ── running flag ─────────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask every task using this session to stop after its current step.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("session stop requested");
        }
    }

    // ── state access ─────────────────────────────────────────────────────────

    /// Run `f` against the current state while holding the session lock.
    pub async fn inspect<R>(&self, f: impl FnOnce(&RoverState) -> R) -> Result<R, RoverError> {
        let core = self.core.lock().await;
        Ok(f(core.state()?))
    }

    /// Run `f` against the mutable state while holding the session lock.
    /// Used for bookkeeping that needs no planet exchange (failure counters,
    /// danger marks).
    pub async fn update<R>(&self, f: impl FnOnce(&mut RoverState) -> R) -> Result<R, RoverError> {
        let mut core = self.core.lock().await;
        Ok(f(core.state_mut()?))
    }

    pub async fn pose(&self) -> Result<Pose, RoverError> {
        self.inspect(RoverState::require_pose).await?
    }

    pub async fn grid(&self) -> Result<Grid, RoverError> {
        self.inspect(RoverState::grid).await
    }

    // ── primitives ───────────────────────────────────────────────────────────

    async fn exchange(
        &self,
        core: &mut SessionCore,
        command: &PlanetCommand,
    ) -> Result<Reply, RoverError> {
        match core.client.send(command).await {
            Ok(reply) => {
                self.telemetry.echo_planet_response(&reply.raw);
                Ok(reply)
            }
            Err(e) => {
                if matches!(e, RoverError::Connection(_)) {
                    self.stop();
                }
                Err(e)
            }
        }
    }

    /// Land at `cell` facing `heading`.
    ///
    /// The cell is checked against the grid before anything is sent.
    pub async fn land(&self, cell: Cell, heading: Heading) -> Result<Pose, RoverError> {
        let mut core = self.core.lock().await;
        {
            let state = core.state()?;
            state.grid().check(cell)?;
            if state.is_landed() {
                return Err(RoverError::InvalidState("rover has already landed".to_string()));
            }
        }
        let command = PlanetCommand::Land {
            position: Position::new(cell, heading),
        };
        let reply = self.exchange(&mut core, &command).await?;
        let PlanetResponse::Landed { measure } = reply.response else {
            return Err(RoverError::protocol("landed", reply.raw));
        };
        core.state_mut()?.apply_landing(cell, heading)?;
        drop(core);

        info!(x = cell.x, y = cell.y, heading = %heading, "landed");
        if let Some(measure) = measure {
            self.telemetry.forward_measurement(cell, &measure);
        }
        Ok(Pose::new(cell, heading))
    }

    /// Rotate once; returns the heading the planet confirmed.
    pub async fn rotate(&self, turn: Turn) -> Result<Heading, RoverError> {
        let mut core = self.core.lock().await;
        core.state()?.require_pose()?;
        let reply = self
            .exchange(&mut core, &PlanetCommand::Rotate { rotation: turn })
            .await?;
        let PlanetResponse::Rotated { direction } = reply.response else {
            return Err(RoverError::protocol("rotated", reply.raw));
        };
        core.state_mut()?.apply_rotation(direction)?;
        debug!(heading = %direction, "rotated");
        Ok(direction)
    }

    /// Scan the cell ahead and forward the measurement.
    pub async fn scan(&self) -> Result<ScanReport, RoverError> {
        let mut core = self.core.lock().await;
        let ahead = {
            let state = core.state()?;
            state.require_pose()?;
            state.cell_ahead()
        };
        let reply = self.exchange(&mut core, &PlanetCommand::Scan).await?;
        let PlanetResponse::Scaned { measure } = reply.response else {
            return Err(RoverError::protocol("scaned", reply.raw));
        };
        if let Some(cell) = ahead {
            core.state_mut()?.record_scan(cell, measure.ground.clone());
        }
        drop(core);

        match ahead {
            Some(cell) => {
                debug!(x = cell.x, y = cell.y, ground = %measure.ground, "scanned");
                self.telemetry.forward_measurement(cell, &measure);
            }
            None => debug!(ground = %measure.ground, "scanned beyond the grid edge"),
        }
        Ok(ScanReport {
            cell: ahead,
            measure,
        })
    }

    /// Move one cell forward, provided the rover still has pose `expected`.
    ///
    /// # Errors
    ///
    /// [`RoverError::Bounds`] when the rover faces the grid edge (nothing is
    /// sent), plus the exchange errors.  An unexpected response tag leaves
    /// position and visited cells untouched.
    pub async fn advance(&self, expected: Pose) -> Result<MoveOutcome, RoverError> {
        let mut core = self.core.lock().await;
        let target = {
            let state = core.state()?;
            let pose = state.require_pose()?;
            if pose != expected {
                debug!(?expected, actual = ?pose, "pose changed before move");
                return Ok(MoveOutcome::Interrupted);
            }
            let target = pose.cell.offset(pose.heading);
            state.grid().check(target)?;
            target
        };
        if let Some(robot) = self.fleet.occupant(target) {
            debug!(x = target.x, y = target.y, robot = %robot, "target occupied");
            return Ok(MoveOutcome::Blocked);
        }

        let reply = self.exchange(&mut core, &PlanetCommand::Move).await?;
        match reply.response {
            PlanetResponse::Moved { position } => {
                let (cell, heading) = match position {
                    Some(p) => (p.cell(), p.direction),
                    None => (target, expected.heading),
                };
                let state = core.state_mut()?;
                state.apply_move(cell)?;
                if heading != expected.heading {
                    state.apply_rotation(heading)?;
                }
                debug!(x = cell.x, y = cell.y, "moved");
                Ok(MoveOutcome::Moved(Pose::new(cell, heading)))
            }
            PlanetResponse::Crashed => {
                warn!(x = target.x, y = target.y, "move crashed");
                Ok(MoveOutcome::Crashed)
            }
            _ => Err(RoverError::protocol("moved or crashed", reply.raw)),
        }
    }

    /// Ground-station forward move: one cell in the current heading, with a
    /// `moved` update on success.
    pub async fn forward(&self) -> Result<MoveOutcome, RoverError> {
        let pose = self.pose().await?;
        let outcome = self.advance(pose).await?;
        if let MoveOutcome::Moved(moved) = outcome {
            self.telemetry.announce_move(moved.cell, moved.heading);
        }
        Ok(outcome)
    }

    /// Ask the planet where the rover is and commit the answer.
    pub async fn getpos(&self) -> Result<Pose, RoverError> {
        let mut core = self.core.lock().await;
        core.state()?.require_pose()?;
        let reply = self.exchange(&mut core, &PlanetCommand::Getpos).await?;
        let PlanetResponse::Pos { position } = reply.response else {
            return Err(RoverError::protocol("pos", reply.raw));
        };
        core.state_mut()?.apply_position(position.cell(), position.direction)?;
        Ok(Pose::new(position.cell(), position.direction))
    }

    /// Send `exit`, stop all tasks and drop the rover state.
    pub async fn exit(&self) -> Result<(), RoverError> {
        self.stop();
        let mut core = self.core.lock().await;
        if core.state.is_none() {
            return Ok(());
        }
        core.state = None;
        core.client.exit().await?;
        info!(robot = %self.name, "session closed");
        Ok(())
    }
}
