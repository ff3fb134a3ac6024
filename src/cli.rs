use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, ValueEnum};

macro_rules! arg_env {
    ($v:literal) => {
        concat!("VIDSPLICE_", $v)
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// HTTP service to grab still frames out of remote videos,
/// and to clip and merge sections of remote videos into a single one.
///
/// Every setting can also be given in the configuration file
/// or with `VIDSPLICE_*` environment variables.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// The path to a TOML configuration file
    #[arg(long, env=arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// The address to listen on, e.g. 0.0.0.0:8000
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// The directory where downloads and temporary files are created
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// The maximum level of the logged messages
    #[arg(long, value_enum, default_value_t=LogLevel::Info, env=arg_env!("LOG_LEVEL"))]
    pub log_level: LogLevel,

    /// Do not check at startup that ffmpeg and ffprobe can be executed
    #[arg(long)]
    pub skip_tool_check: bool,
}
