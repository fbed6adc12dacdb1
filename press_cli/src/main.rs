//! `press`: drive the press controller from scripts, single commands, or stdin.

mod calibrate;
mod cli;
mod error_fmt;
mod rt;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::calibrate::{FitKind, run_fit};
use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::session::{Session, SessionError};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn load_config(path: Option<&Path>) -> eyre::Result<press_config::Config> {
    let Some(path) = path else {
        return Ok(press_config::Config::default());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = press_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate().wrap_err("invalid config")?;
    Ok(cfg)
}

fn run(cli: Cli) -> eyre::Result<()> {
    // Colored panic/eyre reports only for humans.
    if !cli.json {
        let _ = color_eyre::install();
    }
    let cfg = load_config(cli.config.as_deref())?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    tracing::debug!(config = ?cli.config, virtual_time = cli.virtual_time, "starting");

    match cli.cmd {
        Commands::Run {
            script,
            telemetry,
            stats,
            rt,
        } => {
            let text = std::fs::read_to_string(&script)
                .wrap_err_with(|| format!("read script {}", script.display()))?;
            rt::apply(rt);
            let mut session = Session::build(&cfg, cli.json, cli.virtual_time)?;
            let result = session.run_script(&text);
            if telemetry {
                session.print_telemetry();
            }
            if stats {
                session.print_stats();
            }
            result
        }
        Commands::Exec { command } => {
            let mut session = Session::build(&cfg, cli.json, cli.virtual_time)?;
            session.exec(&command.join(" "))
        }
        Commands::Serve { rt } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = Arc::clone(&shutdown);
                ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                    .wrap_err("install Ctrl-C handler")?;
            }
            rt::apply(rt);
            let mut session = Session::build(&cfg, cli.json, cli.virtual_time)?;
            session.serve_stdin(&shutdown)
        }
        Commands::FitTorque { csv, persist } => {
            run_fit(FitKind::Torque, &csv, persist, &cfg, cli.json)
        }
        Commands::FitLoadCell { csv, persist } => {
            run_fit(FitKind::LoadCell, &csv, persist, &cfg, cli.json)
        }
        Commands::SelfCheck => self_check(&cfg, cli.json, cli.virtual_time),
    }
}

/// Assemble the press, let it run briefly, and report anything unhealthy.
fn self_check(cfg: &press_config::Config, json: bool, virtual_time: bool) -> eyre::Result<()> {
    let mut session = Session::build(cfg, json, virtual_time)?;
    session.runner.run_for(cfg.runner.period_ms.saturating_mul(10));
    let t = session.telemetry();

    let mut problems = Vec::new();
    if t.motion_state == "FAULT" {
        problems.push("drive fault latched".to_string());
    }
    if !t.enabled {
        problems.push("drives disabled".to_string());
    }
    if !t.sensor_connected {
        problems.push("load cell not connected".to_string());
    }
    if !problems.is_empty() {
        return Err(SessionError::SelfCheck(problems.join(", ")).into());
    }

    if json {
        println!(
            "{}",
            serde_json::json!({
                "self_check": "ok",
                "force_kg": t.force_kg,
                "force_source": t.force_source,
                "raw_sample": t.raw_sample,
            })
        );
    } else {
        println!(
            "Self-check OK: drives enabled, load cell connected ({:.2} kg, raw {})",
            t.force_kg, t.raw_sample
        );
    }
    Ok(())
}

fn init_tracing(json: bool, level: &str, logging: &press_config::Logging) -> eyre::Result<()> {
    // RUST_LOG wins over config, config over --log-level.
    let default_level = logging.level.as_deref().unwrap_or(level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .wrap_err_with(|| format!("invalid log level '{default_level}'"))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed(),
        );
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }

    if let Some(file) = &logging.file {
        use tracing_appender::rolling::{RollingFileAppender, Rotation};
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let rotation = match logging.rotation.as_deref() {
            Some("daily") => Rotation::DAILY,
            Some("hourly") => Rotation::HOURLY,
            _ => Rotation::NEVER,
        };
        let appender = RollingFileAppender::new(rotation, dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}
