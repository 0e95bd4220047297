//! # peeper
//!
//! Relay binary. `serve` reads detection lines from stdin and broadcasts
//! the derived signal to every connected actuator; `actuate` connects to
//! a server and drives the local outputs.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use peeper_actuator::{ActuatorClient, ActuatorController, TracingOutput, run_startup_ramp};
use peeper_core::{DetectionParser, SignalPolicy};
use peeper_server::{Broadcaster, run_ingest};
use peeper_settings::{LoggingSettings, PeeperSettings};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Vision-to-actuator signal relay.
#[derive(Parser, Debug)]
#[command(name = "peeper", about = "Vision-to-actuator signal relay")]
struct Cli {
    /// Settings file (defaults to `~/.peeper/settings.json` when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept actuators and broadcast signals derived from stdin.
    Serve {
        /// Port to bind (overrides settings).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a server and drive the outputs.
    Actuate {
        /// Server host (overrides settings).
        #[arg(long)]
        server: Option<String>,

        /// Skip the power-on ramp.
        #[arg(long)]
        no_ramp: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = peeper_settings::load_settings(cli.config.as_deref())
        .context("failed to load settings")?;
    init_tracing(&settings.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(run(cli.command, settings));
    // The stdin reader thread may still be parked on a read.
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn run(command: Command, settings: PeeperSettings) -> Result<()> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    drop(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(err) => warn!(error = %err, "failed to listen for ctrl+c"),
        }
        signal_cancel.cancel();
    }));

    match command {
        Command::Serve { port } => serve(settings, port, cancel).await,
        Command::Actuate { server, no_ramp } => actuate(settings, server, no_ramp, cancel).await,
    }
}

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(
    mut settings: PeeperSettings,
    port: Option<u16>,
    cancel: CancellationToken,
) -> Result<()> {
    if let Some(port) = port {
        settings.server.port = port;
    }
    let parser = DetectionParser::from_settings(&settings.detection)
        .context("invalid detection labels")?;
    let policy = SignalPolicy::from_settings(&settings.detection);
    let broadcaster = Arc::new(
        Broadcaster::new(settings.server.send_interval())
            .with_send_timeout(settings.server.write_timeout()),
    );

    let handle = peeper_server::bind(&settings.server, Arc::clone(&broadcaster), cancel.clone())
        .await
        .with_context(|| {
            format!(
                "failed to start server on {}:{}",
                settings.server.host, settings.server.port
            )
        })?;
    info!(addr = %handle.local_addr(), "peeper server ready");

    let stats = run_ingest(
        BufReader::new(tokio::io::stdin()),
        &parser,
        &policy,
        &broadcaster,
        cancel.clone(),
    )
    .await;
    info!(
        lines = stats.lines,
        detections = stats.detections,
        alerts = stats.alerts,
        "ingest finished"
    );

    // Keep serving the last signal until shutdown.
    cancel.cancelled().await;
    handle.join().await;
    info!("server stopped");
    Ok(())
}

async fn actuate(
    mut settings: PeeperSettings,
    server: Option<String>,
    no_ramp: bool,
    cancel: CancellationToken,
) -> Result<()> {
    if let Some(server) = server {
        settings.client.server_host = server;
    }
    let parser = DetectionParser::from_settings(&settings.detection)
        .context("invalid detection labels")?;
    let policy = SignalPolicy::from_settings(&settings.detection);
    let mut controller = ActuatorController::new(&settings.sound, Arc::new(TracingOutput));

    if settings.startup.enabled && !no_ramp {
        let _ = run_startup_ramp(&mut controller, &settings.startup, &cancel).await;
    }

    let client = ActuatorClient::new(settings.client, parser, policy);
    client.run(&mut controller, cancel).await;
    let _ = controller.set_duty(0.0);
    info!("actuator stopped");
    Ok(())
}
