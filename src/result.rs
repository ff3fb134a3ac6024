use std::{fmt::Display, time::Duration};

use miette::Diagnostic;
use thiserror::Error;

use crate::outside::CommandError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The external tool invocation an error or a timeout comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStage {
    Probe,
    Frame,
    Clip,
    Merge,
}

impl Display for ToolStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ToolStage::Probe => "probe",
            ToolStage::Frame => "frame extraction",
            ToolStage::Clip => "clip",
            ToolStage::Merge => "merge",
        })
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// The request itself is invalid (empty lists, bad indices or ranges...)
    #[error("{0}")]
    #[diagnostic(code(vidsplice::invalid_input))]
    InvalidInput(String),

    /// The request body could not be decoded
    #[error("{0}")]
    #[diagnostic(code(vidsplice::malformed_request))]
    MalformedRequest(String),

    /// The URL is given by the caller, so a failed download is its fault
    #[error("Failed to download video: {source}")]
    #[diagnostic(code(vidsplice::download))]
    Download {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to open video file: {0}")]
    #[diagnostic(code(vidsplice::unreadable_video))]
    UnreadableVideo(String),

    #[error("{0}")]
    #[diagnostic(code(vidsplice::time_out_of_range))]
    TimeOutOfRange(String),

    #[error("Failed to extract frame from video: {0}")]
    #[diagnostic(code(vidsplice::frame_extraction))]
    FrameExtraction(String),

    #[error("Failed to clip section {section}: {stderr}")]
    #[diagnostic(code(vidsplice::clip_failed))]
    ClipFailed { section: i64, stderr: String },

    #[error("Failed to merge clips: {stderr}")]
    #[diagnostic(code(vidsplice::merge_failed))]
    MergeFailed { stderr: String },

    #[error("The {stage} command timed out after {}s", timeout.as_secs())]
    #[diagnostic(code(vidsplice::tool_timeout))]
    ToolTimeout { stage: ToolStage, timeout: Duration },

    #[error(transparent)]
    #[diagnostic(code(vidsplice::tool))]
    Tool(#[from] CommandError),

    #[error(transparent)]
    #[diagnostic(code(vidsplice::io))]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Whether the error is caused by the request content rather than by the server.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_)
                | Error::MalformedRequest(_)
                | Error::Download { .. }
                | Error::UnreadableVideo(_)
                | Error::TimeOutOfRange(_)
                | Error::FrameExtraction(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
