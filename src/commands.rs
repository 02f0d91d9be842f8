use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::cli::{EmbedArgs, MetadataArgs, SplitArgs, ValidateArgs};
use crate::cutter::{AudioCutter as _, FfmpegConfig, FfmpegCutter};
use crate::embed::{EmbedRequest, embed as embed_chapters};
use crate::formats::{AudioFormat, BookMetadata, ChapterRecord, ChapterSource, SplitJob};
use crate::processed::{LocalFsProcessedStore, ProcessedStore, input_key};
use crate::split::{ProgressEvent, SplitOptions, SplitOrchestrator};
use crate::tagger::FfmpegTagger;
use crate::units::format_duration;
use crate::validate::validate_all;

const PROCESSED_LOG_ENV: &str = "CHAPTERSPLIT_PROCESSED_LOG";

pub fn load_chapters(path: &Path) -> anyhow::Result<(Vec<ChapterRecord>, Option<i64>)> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("read chapters: {}", path.display()))?;
    let source: ChapterSource = serde_json::from_str(&json)
        .with_context(|| format!("parse chapters: {}", path.display()))?;
    Ok(source.into_parts())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").context("write stdout")?;
    Ok(())
}

fn book_metadata(args: MetadataArgs, input: &Path) -> BookMetadata {
    let title = args.title.unwrap_or_else(|| {
        input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Audiobook".to_owned())
    });
    BookMetadata {
        title,
        author: args.author,
        narrator: args.narrator,
        genre: args.genre,
        year: args.year,
        comment: args.comment,
        cover_image: args.cover.map(PathBuf::from),
    }
}

/// Cancels `cancel` on the first Ctrl-C. Only preflight observes it.
fn cancel_on_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping if still in preflight");
            cancel.cancel();
        }
    });
}

pub async fn validate(args: ValidateArgs) -> anyhow::Result<()> {
    let chapters_path = PathBuf::from(&args.chapters);
    let (chapters, runtime_ms) = load_chapters(&chapters_path)?;

    let duration_ms = match (args.duration_ms, &args.input) {
        (Some(duration_ms), _) => Some(duration_ms),
        (None, Some(input)) => {
            let cutter = FfmpegCutter::new(FfmpegConfig::from_env());
            let probe = cutter
                .probe(Path::new(input))
                .await
                .with_context(|| format!("probe input: {input}"))?;
            Some(i64::try_from(probe.duration_ms).unwrap_or(i64::MAX))
        }
        (None, None) => runtime_ms,
    };
    if duration_ms.is_none() {
        tracing::info!("no total duration known; skipping coverage checks");
    }

    let result = validate_all(&chapters, duration_ms);
    print_json(&result)?;

    anyhow::ensure!(
        result.is_valid,
        "chapters are invalid ({} error(s))",
        result.errors.len()
    );
    Ok(())
}

pub async fn split(args: SplitArgs) -> anyhow::Result<()> {
    let input = PathBuf::from(&args.input);
    let (chapters, _) = load_chapters(Path::new(&args.chapters))?;

    let format = match args.format {
        Some(format) => format,
        None => AudioFormat::from_path(&input)
            .with_context(|| format!("unsupported input format: {}", input.display()))?,
    };
    let metadata = book_metadata(args.metadata, &input);

    let processed_log = args
        .processed_log
        .or_else(|| std::env::var(PROCESSED_LOG_ENV).ok())
        .filter(|path| !path.trim().is_empty());
    let store: Option<Arc<dyn ProcessedStore>> = processed_log
        .map(|path| Arc::new(LocalFsProcessedStore::new(path)) as Arc<dyn ProcessedStore>);

    if let Some(store) = &store
        && !args.force
        && !args.dry_run
        && let Some(entry) = store
            .get(&input_key(&input))
            .await
            .context("read processed log")?
    {
        tracing::info!(
            input = %input.display(),
            output_dir = %entry.output_dir.display(),
            processed_at = %entry.processed_at,
            "already processed; pass --force to split again"
        );
        return Ok(());
    }

    let cut_timeout = match args.cut_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let config = FfmpegConfig::from_env().with_cut_timeout(cut_timeout);
    let tagger = Arc::new(FfmpegTagger::new(config.ffmpeg_bin.clone()));
    let cutter = Arc::new(FfmpegCutter::new(config));

    let mut options = SplitOptions {
        verify_durations: !args.no_verify,
        ..SplitOptions::default()
    };
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency;
    }

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let mut orchestrator = SplitOrchestrator::new(cutter, tagger)
        .with_options(options)
        .with_cancellation(cancel)
        .with_progress(Arc::new(|event: &ProgressEvent| match event {
            ProgressEvent::PreflightPassed {
                duration_ms,
                chapters,
            } => tracing::info!(
                chapters,
                duration = %format_duration(i64::try_from(*duration_ms).unwrap_or(i64::MAX)),
                "preflight passed"
            ),
            ProgressEvent::ChapterFinished {
                number,
                total,
                status,
            } => tracing::info!(?status, "chapter {number}/{total}"),
            ProgressEvent::Completed { .. } => {}
        }));
    if let Some(store) = store {
        orchestrator = orchestrator.with_processed_store(store);
    }

    let job = SplitJob {
        book_title: metadata.title.clone(),
        chapters,
        input_path: input,
        output_dir: PathBuf::from(&args.out),
        format,
        dry_run: args.dry_run,
        overwrite: args.overwrite,
        metadata,
    };
    let result = orchestrator.split(&job).await?;
    print_json(&result)?;

    anyhow::ensure!(
        result.success,
        "{} of {} chapters failed",
        result.total_chapters - result.processed_chapters,
        result.total_chapters
    );
    Ok(())
}

pub async fn embed(args: EmbedArgs) -> anyhow::Result<()> {
    let input = PathBuf::from(&args.input);
    let (chapters, _) = load_chapters(Path::new(&args.chapters))?;
    let metadata = book_metadata(args.metadata, &input);

    let config = FfmpegConfig::from_env();
    let tagger = FfmpegTagger::new(config.ffmpeg_bin.clone());
    let cutter = FfmpegCutter::new(config);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let request = EmbedRequest {
        input_path: input,
        chapters,
        metadata,
        output_path: args.out.map(PathBuf::from),
    };
    let output = embed_chapters(&cutter, &tagger, &request, &cancel).await?;
    println!("{}", output.display());
    Ok(())
}
