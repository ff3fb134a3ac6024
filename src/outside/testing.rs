//! Doubles of the external collaborators, so that the pipelines can be tested
//! without ffmpeg nor network access.

use std::{
    collections::HashMap,
    fmt::Debug,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use super::{CommandError, CommandLine, CommandOutput, CommandRunner, MediaFetcher};
use crate::{
    io::named_tempfile_in,
    result::{Error, Result},
    types::MediaRole,
};

type Scripted = std::result::Result<CommandOutput, CommandError>;
type Handler = dyn Fn(&CommandLine) -> Scripted + Send + Sync;

/// Answers every command with a scripted handler and records what was asked.
pub struct ScriptedRunner {
    handler: Box<Handler>,
    calls: Mutex<Vec<CommandLine>>,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&CommandLine) -> std::result::Result<CommandOutput, CommandError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Behaves like a very naive ffmpeg working on plain files:
    /// a clip is a copy of its input, a concatenation appends the listed files.
    pub fn media() -> Self {
        Self::new(simulate_media)
    }

    pub fn respond(&self, cmd: &CommandLine) -> std::result::Result<CommandOutput, CommandError> {
        (self.handler)(cmd)
    }

    pub fn calls(&self) -> Vec<CommandLine> {
        self.calls.lock().unwrap().clone()
    }

    pub fn succeeded() -> CommandOutput {
        CommandOutput {
            status: Some(0),
            ..Default::default()
        }
    }

    pub fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            status: Some(1),
            stderr: stderr.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    pub fn with_stdout(stdout: &[u8]) -> CommandOutput {
        CommandOutput {
            status: Some(0),
            stdout: stdout.to_vec(),
            ..Default::default()
        }
    }
}

impl Debug for ScriptedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("calls", &self.calls.lock().unwrap().len())
            .finish()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        cmd: &CommandLine,
        _timeout: Duration,
    ) -> std::result::Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(cmd.clone());
        self.respond(cmd)
    }
}

fn simulate_media(cmd: &CommandLine) -> std::result::Result<CommandOutput, CommandError> {
    let (Some(input), Some(output)) = (cmd.value_of("-i"), cmd.get_args().last()) else {
        return Ok(ScriptedRunner::succeeded());
    };
    let input = Path::new(input);
    let output = Path::new(output);

    let res = if cmd.has_pair("-f", "concat") {
        concat_listed(input, output)
    } else {
        std::fs::copy(input, output).map(|_| ())
    };

    Ok(match res {
        Ok(()) => ScriptedRunner::succeeded(),
        Err(err) => ScriptedRunner::failed(&err.to_string()),
    })
}

fn concat_listed(manifest: &Path, output: &Path) -> std::io::Result<()> {
    let mut data = Vec::new();
    for line in std::fs::read_to_string(manifest)?.lines() {
        let path = line
            .strip_prefix("file '")
            .and_then(|rest| rest.strip_suffix('\''))
            .map(|path| path.replace(r"'\''", "'"))
            .ok_or_else(|| std::io::Error::other(format!("bad manifest line: {line}")))?;
        data.extend(std::fs::read(PathBuf::from(path))?);
    }
    std::fs::write(output, data)
}

/// Serves fixed contents per URL, writing them to the scratch directory like a real download.
#[derive(Debug)]
pub struct StaticFetcher {
    scratch_dir: PathBuf,
    bodies: HashMap<String, Vec<u8>>,
    fetched: AtomicUsize,
}

impl StaticFetcher {
    pub fn new<I, U, B>(scratch_dir: &Path, bodies: I) -> Self
    where
        I: IntoIterator<Item = (U, B)>,
        U: Into<String>,
        B: Into<Vec<u8>>,
    {
        Self {
            scratch_dir: scratch_dir.to_path_buf(),
            bodies: bodies
                .into_iter()
                .map(|(url, body)| (url.into(), body.into()))
                .collect(),
            fetched: AtomicUsize::new(0),
        }
    }

    /// Number of fetch attempts, successful or not
    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<NamedTempFile> {
        self.fetched.fetch_add(1, Ordering::SeqCst);

        let body = self.bodies.get(url).ok_or_else(|| Error::Download {
            url: url.to_owned(),
            source: "404 Not Found".into(),
        })?;

        let file = named_tempfile_in(&self.scratch_dir, MediaRole::Source)?;
        std::fs::write(file.path(), body)?;
        Ok(file)
    }
}
