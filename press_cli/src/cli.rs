//! CLI argument definitions and shared statics.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "press", version, about = "Press motion controller CLI")]
pub struct Cli {
    /// Path to config TOML (typed); device defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print events, telemetry and errors as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Run the simulator on virtual time: waits and moves complete instantly
    #[arg(long, action = ArgAction::SetTrue)]
    pub virtual_time: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// How much of the address space `--rt` pins into RAM.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Leave paging alone
    None,
    /// Pin pages resident now (MCL_CURRENT)
    Current,
    /// Pin resident and future pages (MCL_CURRENT|MCL_FUTURE)
    All,
}

impl RtLock {
    /// `current` on Linux, `none` elsewhere.
    pub const fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            Self::Current
        } else {
            Self::None
        }
    }
}

/// Scheduling knobs for commands that keep the control loop running.
#[derive(Args, Debug, Clone, Copy)]
pub struct RtArgs {
    /// Run the control loop with real-time settings
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Run the control loop with real-time settings.\n\nLinux: SCHED_FIFO, one pinned CPU and mlockall, so a page fault or a busy core cannot stretch a loop period past the watchdog. Needs CAP_SYS_NICE and CAP_IPC_LOCK (or root) and a large enough memlock ulimit.\n\nmacOS: mlockall only."
    )]
    pub rt: bool,
    /// SCHED_FIFO priority (Linux); defaults to the maximum
    #[arg(long, value_name = "PRIO")]
    pub rt_prio: Option<i32>,
    /// Memory locking with --rt: none, current or all
    #[arg(long, value_enum, value_name = "MODE")]
    pub rt_lock: Option<RtLock>,
    /// CPU the loop is pinned to with --rt (Linux, default 0)
    #[arg(long, value_name = "CPU")]
    pub rt_cpu: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a command script against the press, one command per line
    Run {
        /// Script file; `#` starts a comment, `wait <ms>` idles the loop
        #[arg(long, value_name = "FILE")]
        script: PathBuf,
        /// Print final telemetry after the script
        #[arg(long, action = ArgAction::SetTrue)]
        telemetry: bool,
        /// Print control loop stats to stderr
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Execute a single command line, e.g. `press exec move_abs 10 5`
    Exec {
        #[arg(
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },
    /// Read commands from stdin until EOF or Ctrl-C
    Serve {
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Fit the torque-to-force map from a `kg,torque_pct` CSV
    FitTorque {
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,
        /// Write the fit to storage.calibration_file
        #[arg(long, action = ArgAction::SetTrue)]
        persist: bool,
    },
    /// Fit the load cell map from a `raw,kg` CSV
    FitLoadCell {
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,
        /// Write the fit to storage.calibration_file
        #[arg(long, action = ArgAction::SetTrue)]
        persist: bool,
    },
    /// Quick health check (config, calibration store, drives, load cell)
    SelfCheck,
}
