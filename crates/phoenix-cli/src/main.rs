//! `phoenix-bridge` – host process for the Phoenix hardware bridge.
//!
//! 1. Loads the TOML configuration (hardware description, loop rate,
//!    setpoints).
//! 2. `check`: initialises the bridge and prints the exported interfaces.
//! 3. `run`: optionally starts the simulated motor controllers, activates
//!    the bridge, and drives `read`/`write` at the configured rate until
//!    Ctrl-C or `--duration` elapses, then deactivates cleanly.

mod config;
mod control_loop;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use phoenix_hal::sim::SimMotorController;
use phoenix_hal::{PhoenixBridge, SystemInterface};
use phoenix_middleware::MessageBus;
use phoenix_types::CallbackReturn;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::control_loop::LoopSettings;

#[derive(Parser, Debug)]
#[command(name = "phoenix-bridge")]
#[command(version)]
#[command(about = "Bridge a fixed-rate control loop to Phoenix motor controllers")]
struct Cli {
    /// Path to the bridge configuration file
    #[arg(short, long, value_name = "FILE", default_value = "phoenix.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and list the exported interfaces
    Check,
    /// Run the control loop
    Run {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long, value_name = "SECONDS")]
        duration: Option<f64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _telemetry = telemetry::init_tracing("phoenix-bridge");

    let cfg = match config::load(&cli.config).and_then(|cfg| cfg.validate().map(|()| cfg)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Check => check(&cfg),
        Command::Run { duration } => run(&cfg, duration),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "phoenix-bridge failed");
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn check(cfg: &Config) -> Result<(), String> {
    let mut bridge = PhoenixBridge::new(Arc::new(MessageBus::new()));
    if bridge.on_init(&cfg.hardware) != CallbackReturn::Success {
        return Err(format!("hardware '{}' rejected", cfg.hardware.name));
    }

    println!("hardware: {}", cfg.hardware.name);
    println!("  command interfaces:");
    for handle in bridge.export_command_interfaces() {
        println!("    {}", handle.full_name());
    }
    println!("  state interfaces:");
    for handle in bridge.export_state_interfaces() {
        println!("    {}", handle.full_name());
    }
    println!("  loop: {} Hz, simulate = {}", cfg.update_rate_hz, cfg.simulate);

    bridge.on_shutdown();
    Ok(())
}

fn run(cfg: &Config, duration: Option<f64>) -> Result<(), String> {
    let duration = match duration {
        Some(secs) if !secs.is_finite() || secs < 0.0 => {
            return Err(format!("--duration must be a non-negative number, got {secs}"));
        }
        Some(secs) => Some(Duration::from_secs_f64(secs)),
        None => None,
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Ctrl-C received, stopping control loop");
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the loop only stops on --duration");
    }

    let bus = Arc::new(MessageBus::new());
    let sim = if cfg.simulate {
        let names = cfg.hardware.joints.iter().map(|j| j.name.clone());
        Some(
            SimMotorController::spawn(Arc::clone(&bus), names, cfg.sim_max_velocity)
                .map_err(|e| format!("simulated controllers failed to start: {e}"))?,
        )
    } else {
        None
    };

    let mut bridge = PhoenixBridge::new(Arc::clone(&bus));
    if bridge.on_init(&cfg.hardware) != CallbackReturn::Success {
        return Err(format!("hardware '{}' rejected", cfg.hardware.name));
    }
    let state = bridge.export_state_interfaces();
    let commands = bridge.export_command_interfaces();
    control_loop::apply_setpoints(&commands, &cfg.setpoints).map_err(|e| e.to_string())?;

    if bridge.on_activate() != CallbackReturn::Success {
        bridge.on_shutdown();
        return Err("bridge activation failed".to_string());
    }

    let settings = LoopSettings {
        period: cfg.period(),
        duration,
        status_interval: Duration::from_secs(1),
    };
    let report = control_loop::run(&mut bridge, &state, &settings, &shutdown);
    control_loop::log_status(&state);

    let deactivated = bridge.on_deactivate();
    bridge.on_shutdown();
    if let Some(sim) = sim
        && let Err(e) = sim.stop()
    {
        warn!(error = %e, "simulated controllers stopped with error");
    }

    if deactivated != CallbackReturn::Success {
        return Err("bridge deactivation failed".to_string());
    }
    if report.write_errors > 0 || report.read_errors > 0 {
        warn!(
            read_errors = report.read_errors,
            write_errors = report.write_errors,
            "control loop reported errors"
        );
    }
    Ok(())
}
