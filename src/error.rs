use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cutter::CutError;
use crate::process::ToolError;
use crate::tagger::TagError;

fn human_bytes(bytes: &u64) -> String {
    crate::units::format_bytes(*bytes)
}

/// How a job-level failure should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input or environment detected before any output was written.
    Validation,
    /// Filesystem or tool failure.
    Io,
    Cancelled,
}

/// A failure that stops a whole job. Per-chapter failures never surface as this type.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("cancelled before preflight completed")]
    Cancelled,

    #[error("cutting tool is unavailable: {0}")]
    ToolUnavailable(#[source] ToolError),

    #[error("input is not readable: {}", .path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("input is not a regular file: {}", .0.display())]
    InputNotFile(PathBuf),

    #[error("input is empty: {}", .0.display())]
    InputEmpty(PathBuf),

    #[error("unsupported input format: {}", .0.display())]
    UnsupportedInput(PathBuf),

    #[error("output would overwrite the input: {}", .0.display())]
    OutputIsInput(PathBuf),

    #[error("cannot stream-copy {input} audio into a {output} container")]
    IncompatibleFormat {
        input: crate::formats::AudioFormat,
        output: crate::formats::AudioFormat,
    },

    #[error("probe input")]
    Probe(#[source] CutError),

    #[error("chapter validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error(
        "insufficient disk space in {}: need {}, {} available",
        .path.display(),
        human_bytes(.required),
        human_bytes(.available)
    )]
    InsufficientSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("query free space: {}", .path.display())]
    SpaceQuery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("create output directory: {}", .path.display())]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("copy {} to {}", .from.display(), .to.display())]
    CopyInput {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("embed chapters")]
    Tag(#[source] TagError),
}

impl JobError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Cancelled => ErrorClass::Cancelled,
            Self::ToolUnavailable(_)
            | Self::InputNotFile(_)
            | Self::InputEmpty(_)
            | Self::UnsupportedInput(_)
            | Self::IncompatibleFormat { .. }
            | Self::OutputIsInput(_)
            | Self::Validation(_)
            | Self::InsufficientSpace { .. } => ErrorClass::Validation,
            Self::InputUnreadable { .. }
            | Self::Probe(_)
            | Self::SpaceQuery { .. }
            | Self::CreateOutputDir { .. }
            | Self::CopyInput { .. }
            | Self::Tag(_) => ErrorClass::Io,
        }
    }
}
