#![forbid(unsafe_code)]

pub mod artifacts;
pub mod cli;
pub mod commands;
pub mod cutter;
pub mod embed;
pub mod error;
pub mod formats;
pub mod logging;
pub mod pool;
pub mod process;
pub mod processed;
pub mod resources;
pub mod sanitize;
pub mod split;
pub mod tagger;
pub mod units;
pub mod validate;

pub use error::{ErrorClass, JobError};
pub use formats::{
    AudioFormat, BookMetadata, ChapterFileResult, ChapterRecord, SplitJob, SplitResult,
    ValidationResult,
};
pub use split::{SplitOptions, SplitOrchestrator};
pub use validate::validate_all;
