//! [`GroundStationBridge`] – remote override channel.
//!
//! Reads ground-station commands one line at a time and dispatches them to
//! the same [`RoverSession`] primitives the exploration engine uses.  In the
//! same loop it drains the session's [`TelemetryForwarder`] and writes every
//! outbound message back to the ground station.
//!
//! Errors local to one command (bounds, not landed, malformed or unknown
//! lines, refused moves) are logged and the loop continues.  Fatal errors
//! (protocol, connection) stop the session and end the loop.  A failed
//! exploration only ends the exploration task, unless the planet link itself
//! failed.
//!
//! [`TelemetryForwarder`]: exorover_engine::TelemetryForwarder

use std::time::Duration;

use exorover_engine::{CrashPolicy, ExplorationEngine, ExplorationSummary, MoveOutcome, RoverSession};
use exorover_types::{RoverError, Turn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::command::GroundCommand;
use crate::link::GroundLink;

/// How often the listener checks the session's running flag while idle.
const RUNNING_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Whether the listener keeps going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

type ExplorationTask = JoinHandle<Result<ExplorationSummary, RoverError>>;

pub struct GroundStationBridge {
    session: RoverSession,
    policy: CrashPolicy,
    exploration: Option<ExplorationTask>,
}

impl GroundStationBridge {
    pub fn new(session: RoverSession, policy: CrashPolicy) -> Self {
        Self {
            session,
            policy,
            exploration: None,
        }
    }

    pub fn session(&self) -> &RoverSession {
        &self.session
    }

    pub fn is_exploring(&self) -> bool {
        self.exploration
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Spawn an exploration run on its own task.  Returns `false` (and warns)
    /// when one is already running.
    pub async fn start_exploration(&mut self) -> Result<bool, RoverError> {
        if self.is_exploring() {
            warn!("exploration already running; ignoring explore");
            return Ok(false);
        }
        self.session.pose().await?;

        let session = self.session.clone();
        let policy = self.policy;
        self.exploration = Some(tokio::spawn(async move {
            let mut engine = ExplorationEngine::new(session.clone(), policy);
            let result = engine.explore().await;
            match &result {
                Ok(summary) => info!(
                    visited = summary.visited,
                    dangers = summary.dangers,
                    completed = summary.completed,
                    "exploration task done"
                ),
                Err(e) if e.is_link_failure() => {
                    error!(error = %e, "exploration task failed; planet link lost");
                    session.stop();
                }
                Err(e) => error!(error = %e, "exploration task failed"),
            }
            result
        }));
        Ok(true)
    }

    /// Wait for the current exploration task, if any.
    pub async fn wait_for_exploration(&mut self) -> Option<Result<ExplorationSummary, RoverError>> {
        let task = self.exploration.take()?;
        match task.await {
            Ok(result) => Some(result),
            Err(e) => Some(Err(RoverError::InvalidState(format!(
                "exploration task panicked: {e}"
            )))),
        }
    }

    /// Execute one decoded command.
    pub async fn dispatch(&mut self, command: GroundCommand) -> Result<Flow, RoverError> {
        match command {
            GroundCommand::Land { cell, heading } => {
                self.session.land(cell, heading).await?;
            }
            GroundCommand::Scan => {
                let report = self.session.scan().await?;
                info!(ground = %report.measure.ground, temp = report.measure.temperature, "scan");
            }
            GroundCommand::Move => match self.session.forward().await? {
                MoveOutcome::Moved(pose) => {
                    info!(x = pose.cell.x, y = pose.cell.y, heading = %pose.heading, "moved forward");
                }
                MoveOutcome::Blocked => warn!("move refused: another robot occupies the target"),
                MoveOutcome::Crashed => warn!("move crashed"),
                MoveOutcome::Interrupted => warn!("move interrupted"),
            },
            GroundCommand::RotateRight => {
                self.session.rotate(Turn::Right).await?;
            }
            GroundCommand::RotateLeft => {
                self.session.rotate(Turn::Left).await?;
            }
            GroundCommand::Explore => {
                self.start_exploration().await?;
            }
            GroundCommand::GetPos => {
                let pose = self.session.getpos().await?;
                info!(x = pose.cell.x, y = pose.cell.y, heading = %pose.heading, "position");
            }
            GroundCommand::Update { name, cell } => {
                self.session.fleet().update(name, cell);
            }
            GroundCommand::Disconnect => {
                self.session.stop();
                if let Some(Err(e)) = self.wait_for_exploration().await {
                    warn!(error = %e, "exploration ended with an error");
                }
                self.session.exit().await?;
                return Ok(Flow::Disconnect);
            }
        }
        Ok(Flow::Continue)
    }

    /// Decode and execute one line.  Only fatal errors are returned.
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow, RoverError> {
        let command = match GroundCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, line, "ignoring ground-station line");
                return Ok(Flow::Continue);
            }
        };
        let verb = command.verb();
        info!(verb, "ground-station command");
        match self.dispatch(command).await {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(verb, error = %e, "ground-station command failed");
                Ok(Flow::Continue)
            }
        }
    }

    /// Serve `link` until `disconnect`, end of stream, a fatal error, or the
    /// session being stopped.  A running exploration is awaited before
    /// returning.
    pub async fn run<R, W>(mut self, mut link: GroundLink<R, W>) -> Result<(), RoverError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut outbound = self.session.telemetry().subscribe();
        let mut outbound_open = true;
        let mut ticker = tokio::time::interval(RUNNING_CHECK_INTERVAL);
        info!(robot = self.session.name(), "ground-station bridge running");

        let result = loop {
            tokio::select! {
                line = link.lines.next_line() => match line {
                    Ok(Some(line)) => match self.handle_line(&line).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Disconnect) => break Ok(()),
                        Err(e) => {
                            error!(error = %e, "ground-station listener stopping");
                            self.session.stop();
                            break Err(e);
                        }
                    },
                    Ok(None) => {
                        info!("ground station closed the connection");
                        break Ok(());
                    }
                    Err(e) => {
                        self.session.stop();
                        break Err(RoverError::from(e));
                    }
                },
                message = outbound.recv(), if outbound_open => match message {
                    Ok(message) => {
                        let wire = match message.to_wire() {
                            Ok(wire) => wire,
                            Err(e) => {
                                warn!(id = %message.id, error = %e, "dropping outbound message");
                                continue;
                            }
                        };
                        if let Err(e) = link.send_line(&wire).await {
                            self.session.stop();
                            break Err(e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!(lagged_by = n, "ground station lagged; messages dropped"),
                    Err(RecvError::Closed) => outbound_open = false,
                },
                _ = ticker.tick() => {
                    if !self.session.is_running() {
                        info!("session stopped; ground-station listener exiting");
                        break Ok(());
                    }
                }
            }
        };

        drop(outbound);
        if let Some(Err(e)) = self.wait_for_exploration().await {
            warn!(error = %e, "exploration ended with an error");
        }
        result
    }
}
