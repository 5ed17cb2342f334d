//! `exorover` – Exoplanet Rover Client
//!
//! This binary wires the rovers together.  It:
//!
//! 1. Loads `~/.exorover/config.toml`, writing the defaults on first run.
//! 2. Starts `robots` rovers side by side.  Each one connects to the ground
//!    station (when configured) and registers to obtain its name, connects to
//!    the planet, enters orbit, and optionally lands and explores on its own.
//! 3. Serves ground-station commands until `disconnect`, end of stream, or
//!    **Ctrl-C**, then leaves the planet with `exit`.

mod config;

use colored::Colorize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use exorover_engine::logging::init_tracing;
use exorover_engine::{FleetRegistry, RoverSession, TelemetryForwarder};
use exorover_ground::{GroundLink, GroundStationBridge};
use exorover_protocol::{ProtocolClient, StreamTransport};
use exorover_types::RoverError;

const OUTBOUND_CAPACITY: usize = 256;

fn main() {
    let _tracing = init_tracing("exorover");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run_config(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the rovers …".yellow().bold());
        shutdown_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_fleet(Arc::new(cfg), shutdown_rx)) {
        println!("{}: {}", "Rover stopped".red().bold(), e);
        std::process::exit(1);
    }
    println!("{}", "  ✓ All rovers left the planet.".green());
}

/// Run every configured rover to completion.  Returns the first failure.
async fn run_fleet(
    cfg: Arc<config::Config>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), RoverError> {
    let mut rovers = JoinSet::new();
    for index in 0..cfg.robot_count() {
        let cfg = cfg.clone();
        let shutdown = shutdown.clone();
        rovers.spawn(async move { run_rover(&cfg, index, shutdown).await });
    }

    let mut first_error = None;
    while let Some(joined) = rovers.join_next().await {
        let outcome = joined
            .map_err(|e| RoverError::InvalidState(format!("rover task panicked: {e}")))
            .and_then(|outcome| outcome);
        if let Err(e) = outcome {
            error!(error = %e, "rover stopped");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn run_rover(
    cfg: &config::Config,
    index: u32,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RoverError> {
    let mut link = match cfg.ground_addr() {
        Some(addr) => Some(GroundLink::connect(addr).await?),
        None => {
            warn!(rover = index, "no ground station configured; running standalone");
            None
        }
    };
    let name = match link.as_mut() {
        Some(link) => link.register().await?,
        None => cfg.standalone_name(index),
    };

    let transport = StreamTransport::connect(&cfg.planet_addr).await?;
    let telemetry = TelemetryForwarder::new(OUTBOUND_CAPACITY, cfg.echo_planet_responses);
    let session = RoverSession::orbit(
        ProtocolClient::new(transport),
        &name,
        FleetRegistry::new(),
        telemetry,
    )
    .await?;
    println!(
        "  {} {} is in orbit around {}",
        "✓".green().bold(),
        name.bold(),
        cfg.planet_addr.dimmed()
    );

    let watched = session.clone();
    tokio::spawn(async move {
        if shutdown.wait_for(|stop| *stop).await.is_ok() {
            watched.stop();
        }
    });

    let bridge = GroundStationBridge::new(session.clone(), cfg.crash_policy());
    let outcome = drive(cfg, index, &session, bridge, link).await;

    if let Err(e) = session.exit().await {
        warn!(robot = %name, error = %e, "exit was not delivered to the planet");
    }
    outcome
}

async fn drive<R, W>(
    cfg: &config::Config,
    index: u32,
    session: &RoverSession,
    mut bridge: GroundStationBridge,
    link: Option<GroundLink<R, W>>,
) -> Result<(), RoverError>
where
    R: tokio::io::AsyncRead + Unpin + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
{
    if cfg.auto_explore {
        let pose = session
            .land(cfg.landing_cell(index), cfg.landing.heading)
            .await?;
        info!(robot = session.name(), cell = %pose.cell, heading = %pose.heading, "landed; starting exploration");
        bridge.start_exploration().await?;
    }

    match link {
        Some(link) => bridge.run(link).await,
        None => match bridge.wait_for_exploration().await {
            Some(Ok(summary)) => {
                println!(
                    "  {} {} explored {} cell(s), {} hazard(s), {} step(s)",
                    "✓".green().bold(),
                    session.name().bold(),
                    summary.visited,
                    summary.dangers,
                    summary.steps
                );
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => {
                warn!("nothing to do without a ground station; set auto_explore = true");
                Ok(())
            }
        },
    }
}

fn first_run_config() -> config::Config {
    let mut cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    config::apply_env_overrides(&mut cfg);
    cfg
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____               ____                      "#.bold().cyan());
    println!("{}", r#"  / __/__ _____ ___  / __ \___ _  _____ ____    "#.bold().cyan());
    println!("{}", r#" / _/ \ \ / _ \___/ / /_/ / _ \ |/ / -_) __/    "#.bold().cyan());
    println!("{}", r#"/___//_\_\\___/    /_/ |_|\___/___/\__/_/       "#.bold().cyan());
    println!();
    println!("  {} {}",
        "ExoRover".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Autonomous Exoplanet Rover Client");
    println!();
}
