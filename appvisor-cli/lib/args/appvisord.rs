use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Arguments for the appvisord command
#[derive(Debug, Parser)]
#[command(name = "appvisord", author, styles=styles::styles())]
pub struct AppvisordArgs {
    /// Supervisor settings file (TOML)
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,

    /// App configuration file (YAML). Defaults to `<system_dir>/apps.yaml`
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Log level. Overrides `RUST_LOG`
    #[arg(short = 'l', long = "log-level", value_enum)]
    pub log_level: Option<LogLevel>,

    /// Apps to start in addition to the startup apps
    #[arg(long = "start", value_name = "APP", num_args = 1..)]
    pub start: Vec<String>,

    /// Do not start the apps that are not marked `startManual`
    #[arg(long = "no-autostart", default_value_t = false)]
    pub no_autostart: bool,
}

/// Verbosity of the daemon's logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Errors only.
    Error,

    /// Warnings and errors.
    Warn,

    /// Lifecycle messages.
    Info,

    /// Per-process detail.
    Debug,

    /// Every event.
    Trace,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LogLevel {
    /// The `tracing` filter directive for this level.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
