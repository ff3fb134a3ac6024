use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use config::{Config, Environment, File, FileFormat};
use miette::{Context, IntoDiagnostic, Result};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "VIDSPLICE";

/// Default settings, overridden by the configuration file then by the environment.
const DEFAULTS: &str = indoc::indoc! {r#"
    bind = "0.0.0.0:8000"
    max_parallel_jobs = 1

    [tools]
    ffmpeg = "ffmpeg"
    ffprobe = "ffprobe"
    clip_timeout_secs = 300
    merge_timeout_secs = 600
    frame_timeout_secs = 60

    [fetch]
    connect_timeout_secs = 30
    read_timeout_secs = 30
"#};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// The address the HTTP server listens on
    pub bind: SocketAddr,

    /// Where downloads and request workspaces are created.
    /// Defaults to the system temporary directory.
    pub scratch_dir: Option<PathBuf>,

    /// How many downloads, or clips, of a single request may run at the same time
    pub max_parallel_jobs: usize,

    pub tools: ToolSettings,
    pub fetch: FetchSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSettings {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub clip_timeout_secs: u64,
    pub merge_timeout_secs: u64,
    pub frame_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchSettings {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Settings {
    /// Load the settings from the defaults, the optional TOML file and the environment.
    ///
    /// Environment variables use the `VIDSPLICE_` prefix and `__` between nested keys,
    /// e.g. `VIDSPLICE_TOOLS__CLIP_TIMEOUT_SECS=120`.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Toml));

        if let Some(file) = file {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .into_diagnostic()
            .wrap_err("Could not load the configuration")?
            .try_deserialize::<Settings>()
            .into_diagnostic()
            .wrap_err("Invalid configuration")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn max_parallel_jobs(&self) -> usize {
        self.max_parallel_jobs.max(1)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .expect("Built-in default settings are valid")
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Settings::default().tools
    }
}

impl Default for FetchSettings {
    fn default() -> Self {
        Settings::default().fetch
    }
}
