use std::{
    ffi::{OsStr, OsString},
    fmt::{Debug, Display},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

pub const FFXXX_DEFAULT_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

/// A program and its arguments, built the same way as a [`std::process::Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandLine {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// The argument following the first occurrence of `flag`, if any.
    pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }

    /// Whether the two arguments appear next to each other, e.g. `-c copy`.
    pub fn has_pair(&self, flag: &str, value: &str) -> bool {
        self.args
            .windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// What a finished program left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the program was terminated by a signal
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim_end().to_owned()
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Could not run the {program} command")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("The {program} command did not complete in {}s", timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
}

/// Capability to execute an external program.
///
/// The runner returns an error only if the program could not be executed
/// or did not finish in time. A program that runs but exits with a non-0
/// status is **not** an error at this level: the caller decides.
#[async_trait]
pub trait CommandRunner: Send + Sync + Debug {
    async fn run(
        &self,
        cmd: &CommandLine,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;
}

/// Runs the commands as child processes of the server.
///
/// The child is killed if the timeout fires or if the calling future is dropped.
#[derive(Debug, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        cmd: &CommandLine,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let program = cmd.program().to_string_lossy().into_owned();

        let mut process = Command::new(cmd.program());
        process
            .args(cmd.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing command: {cmd}");
        let child = process.spawn().map_err(|source| CommandError::Spawn {
            program: program.clone(),
            source,
        })?;

        let res = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?,
            Err(_) => return Err(CommandError::TimedOut { program, timeout }),
        };

        debug!("status: {}", res.status);
        debug!("stdout: {} bytes long", res.stdout.len());
        trace!("stdout: {:?}", String::from_utf8_lossy(&res.stdout));
        debug!("stderr: {} bytes long", res.stderr.len());
        trace!("stderr: {:?}", String::from_utf8_lossy(&res.stderr));

        Ok(CommandOutput {
            status: res.status.code(),
            stdout: res.stdout,
            stderr: res.stderr,
        })
    }
}
