//! CLI Entry Point for galil-sequencer
//!
//! Provides command-line access to:
//! - Playing authored programs against configured axes (optionally looping)
//! - Checking a program against the configuration without touching hardware
//! - Homing and jogging a single axis
//! - Printing axis state and telemetry
//!
//! # Usage
//!
//! ```bash
//! galil-sequencer run programs/demo.json --loops 3
//! galil-sequencer check programs/demo.json
//! galil-sequencer home "Vane" --speed 50 --threshold 2.5
//! galil-sequencer jog "Vane" 10 --seconds 2
//! galil-sequencer status
//! ```
//!
//! Controllers with address `sim` use the in-process simulated controller.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use galil_sequencer::axis::Axis;
use galil_sequencer::config::{MotionConfig, DEFAULT_CONFIG_PATH};
use galil_sequencer::hardware::Controller;
use galil_sequencer::logging;
use galil_sequencer::program::{self, ExecutorEvent, ProgramDocument, ProgramExecutor};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Span};

#[derive(Parser)]
#[command(name = "galil-sequencer")]
#[command(about = "Multi-axis motion sequencing for Galil controllers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a program document
    Run {
        /// Path to a program JSON file
        program: PathBuf,

        /// Iterations to play, 0 loops until Ctrl+C
        #[arg(long, default_value = "1")]
        loops: u32,
    },

    /// Compile a program against the configured axes without connecting
    Check {
        /// Path to a program JSON file
        program: PathBuf,
    },

    /// Home one axis between its two mechanical stops
    Home {
        /// Axis name
        axis: String,

        /// Homing speed in engineering units per second
        #[arg(long, default_value = "1")]
        speed: f64,

        /// Torque magnitude that marks a stop
        #[arg(long, default_value = "2.5")]
        threshold: f64,
    },

    /// Jog one axis for a fixed time
    Jog {
        /// Axis name
        axis: String,

        /// Signed speed in engineering units per second
        #[arg(allow_hyphen_values = true)]
        speed: f64,

        /// How long to jog before stopping
        #[arg(long, default_value = "1")]
        seconds: f64,
    },

    /// Print axis state and telemetry as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MotionConfig::load_validated(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(|e| anyhow!(e))?;

    info!(
        application = %config.application.name,
        controllers = config.controllers.len(),
        axes = config.axes.len(),
        "Configuration loaded"
    );

    let rig = match &cli.command {
        Commands::Check { program } => return check(&config, program),
        _ => Rig::connect(&config).await?,
    };
    let result = match cli.command {
        Commands::Check { .. } => Ok(()),
        Commands::Run { program, loops } => run(&config, &rig, &program, loops).await,
        Commands::Home {
            axis,
            speed,
            threshold,
        } => home(&rig, &axis, speed, threshold).await,
        Commands::Jog {
            axis,
            speed,
            seconds,
        } => jog(&rig, &axis, speed, seconds).await,
        Commands::Status => status(&rig).await,
    };
    rig.shutdown().await;
    result
}

fn check(config: &MotionConfig, path: &Path) -> Result<()> {
    let document = ProgramDocument::load(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let compiled = program::compile(document.instructions())?;
    let known: HashSet<&str> = config.axes.iter().map(|a| a.name.as_str()).collect();
    if let Some(missing) = compiled.axes().into_iter().find(|n| !known.contains(n)) {
        bail!("Program references unknown axis '{}'", missing);
    }
    println!(
        "{}: {} instructions, {} events, {} ms, axes: {}",
        path.display(),
        document.len(),
        compiled.len(),
        compiled.duration_ms(),
        compiled.axes().join(", ")
    );
    Ok(())
}

async fn run(config: &MotionConfig, rig: &Rig, path: &Path, loops: u32) -> Result<()> {
    let document = ProgramDocument::load(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let executor = Arc::new(
        ProgramExecutor::new(rig.axes.iter().cloned())
            .with_timing(config.timing.executor_timing())
            .with_span(&rig.span),
    );
    let mut events = executor.subscribe();
    let handle = executor.start(document.instructions(), loops)?;
    info!(program = %path.display(), run_id = %handle.run_id(), loops, "Playing");

    let stopper = Arc::clone(&executor);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping run");
            stopper.stop();
        }
    });
    let progress = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ExecutorEvent::IterationCompleted { iteration } = event {
                println!("iteration {iteration} complete");
            }
        }
    });

    let summary = handle.join().await;
    interrupt.abort();
    progress.abort();

    match summary {
        Some(summary) => {
            println!(
                "run {} {:?} after {} iteration(s)",
                summary.run_id, summary.outcome, summary.iterations
            );
            Ok(())
        }
        None => bail!("Playback task failed"),
    }
}

async fn home(rig: &Rig, name: &str, speed: f64, threshold: f64) -> Result<()> {
    let axis = rig.axis(name)?;
    axis.home(speed, threshold);
    wait_idle_or_interrupt(axis).await;
    let snapshot = axis.snapshot();
    println!(
        "{}: homed = {}, limit = {}",
        snapshot.name, snapshot.homed, snapshot.limit
    );
    Ok(())
}

async fn jog(rig: &Rig, name: &str, speed: f64, seconds: f64) -> Result<()> {
    if !seconds.is_finite() || seconds < 0.0 {
        bail!("--seconds must be a non-negative number");
    }
    let axis = rig.axis(name)?;
    axis.jog_move(speed);
    tokio::select! {
        _ = sleep(Duration::from_secs_f64(seconds)) => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted"),
    }
    axis.cancel();
    wait_idle_or_interrupt(axis).await;
    Ok(())
}

async fn status(rig: &Rig) -> Result<()> {
    for axis in &rig.axes {
        let report = serde_json::json!({
            "axis": axis.snapshot(),
            "telemetry": axis.telemetry().await,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// Waits for the axis queue to drain. Ctrl+C cancels the axis and keeps waiting
/// for the cancel sequence.
async fn wait_idle_or_interrupt(axis: &Axis) {
    let mut cancelled = false;
    loop {
        tokio::select! {
            _ = sleep(Duration::from_millis(50)) => {
                if axis.is_idle() {
                    return;
                }
            }
            _ = tokio::signal::ctrl_c(), if !cancelled => {
                warn!(axis = %axis.name(), "Interrupted");
                axis.cancel();
                cancelled = true;
            }
        }
    }
}

/// Connected controllers and their axes.
struct Rig {
    span: Span,
    controllers: Vec<Arc<Controller>>,
    axes: Vec<Arc<Axis>>,
}

impl Rig {
    async fn connect(config: &MotionConfig) -> Result<Self> {
        let span = info_span!("sequencer");
        let timing = config.timing.axis_timing();
        let mut controllers = Vec::with_capacity(config.controllers.len());
        let mut axes = Vec::with_capacity(config.axes.len());

        for definition in &config.controllers {
            let controller = Arc::new(
                Controller::new(definition.id.clone())
                    .with_span(&span)
                    .with_baud(definition.baud)
                    .with_timeout(config.timing.command_timeout()),
            );
            if !controller.open(&definition.address).await {
                error!(controller = %definition.id, address = %definition.address, "Open failed");
                bail!(
                    "Could not connect to controller '{}' at {}",
                    definition.id,
                    definition.address
                );
            }
            // Motors start released; motion tasks enable their own axis.
            controller.disable().await;
            if let Some(description) = controller.info().await {
                info!(controller = %definition.id, link = %description, "Motors released");
            }

            for axis in config.axes_of(&definition.id) {
                let letter = axis.axis_letter().map_err(|e| anyhow!(e))?;
                axes.push(
                    Axis::builder(axis.name.clone(), letter, Arc::clone(&controller))
                        .conversion_factor(axis.conversion_factor)
                        .timing(timing)
                        .spawn(),
                );
            }
            controllers.push(controller);
        }

        Ok(Self {
            span,
            controllers,
            axes,
        })
    }

    fn axis(&self, name: &str) -> Result<&Arc<Axis>> {
        self.axes
            .iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| anyhow!("Unknown axis '{}'", name))
    }

    async fn shutdown(self) {
        for axis in &self.axes {
            axis.cancel();
        }
        for axis in &self.axes {
            wait_until_idle(axis, Duration::from_secs(5)).await;
            axis.shutdown().await;
        }
        for controller in &self.controllers {
            controller.close().await;
        }
        info!("Shut down");
    }
}

async fn wait_until_idle(axis: &Axis, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while !axis.is_idle() && tokio::time::Instant::now() < deadline {
        sleep(Duration::from_millis(20)).await;
    }
}
