use clap::{Args, Parser, Subcommand};

use crate::formats::AudioFormat;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log at debug level (ignored when RUST_LOG is set).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Validate(ValidateArgs),
    Split(SplitArgs),
    Embed(EmbedArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Chapter list (JSON array, or object with a `chapters` field).
    #[arg(long)]
    pub chapters: String,

    /// Total audio duration in milliseconds.
    #[arg(long, conflicts_with = "input")]
    pub duration_ms: Option<i64>,

    /// Audio file to probe for the total duration.
    #[arg(long)]
    pub input: Option<String>,
}

#[derive(Debug, Args, Default)]
pub struct MetadataArgs {
    /// Book title (default: input file name without extension).
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long)]
    pub narrator: Option<String>,

    #[arg(long)]
    pub genre: Option<String>,

    #[arg(long)]
    pub year: Option<u16>,

    #[arg(long)]
    pub comment: Option<String>,

    /// Cover image embedded into every tagged file.
    #[arg(long)]
    pub cover: Option<String>,
}

#[derive(Debug, Args)]
pub struct SplitArgs {
    /// Input audio file.
    #[arg(long)]
    pub input: String,

    /// Chapter list (JSON array, or object with a `chapters` field).
    #[arg(long)]
    pub chapters: String,

    /// Output directory for chapter files (created if missing).
    #[arg(long)]
    pub out: String,

    #[command(flatten)]
    pub metadata: MetadataArgs,

    /// Output container (default: same as input).
    #[arg(long)]
    pub format: Option<AudioFormat>,

    /// Validate and print planned files without writing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Re-cut chapters whose output file already exists.
    #[arg(long)]
    pub overwrite: bool,

    /// Maximum concurrent cuts, at most 4 (default: derived from CPUs and memory).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-chapter cut timeout in seconds; 0 disables it.
    #[arg(long, default_value_t = 1800)]
    pub cut_timeout_secs: u64,

    /// Skip probing written chapters for duration drift.
    #[arg(long)]
    pub no_verify: bool,

    /// Processed-file log (default: $CHAPTERSPLIT_PROCESSED_LOG).
    #[arg(long)]
    pub processed_log: Option<String>,

    /// Split even if the processed log already lists this input.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct EmbedArgs {
    /// Input audio file.
    #[arg(long)]
    pub input: String,

    /// Chapter list (JSON array, or object with a `chapters` field).
    #[arg(long)]
    pub chapters: String,

    /// Output file (default: `<input stem> (chaptered).<ext>` next to the input).
    #[arg(long)]
    pub out: Option<String>,

    #[command(flatten)]
    pub metadata: MetadataArgs,
}
