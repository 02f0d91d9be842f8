use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::artifacts;
use crate::cutter::{AudioCutter, AudioProbe};
use crate::error::JobError;
use crate::formats::{
    AudioFormat, BookMetadata, ChapterFileResult, ChapterRecord, ChapterTags, SplitJob,
    SplitResult,
};
use crate::pool::WorkerPool;
use crate::processed::{ProcessedEntry, ProcessedStore, input_key};
use crate::resources;
use crate::sanitize::generate_chapter_filename;
use crate::tagger::Tagger;
use crate::validate::{normalize_titles, sort_by_start_time, validate_all};

/// Largest accepted difference between a chapter's expected and probed duration.
pub const DEFAULT_DURATION_TOLERANCE_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStatus {
    Written,
    Skipped,
    Failed,
    Simulated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    PreflightPassed { duration_ms: u64, chapters: usize },
    ChapterFinished { number: u32, total: u32, status: ChapterStatus },
    Completed { processed: usize, total: usize },
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Clamped to `1..=MAX_CONCURRENT_CUTS` when the pool is built.
    pub concurrency: usize,
    /// Probe every written chapter and warn when its duration is off.
    pub verify_durations: bool,
    pub duration_tolerance_ms: u64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            concurrency: resources::default_concurrency(),
            verify_durations: true,
            duration_tolerance_ms: DEFAULT_DURATION_TOLERANCE_MS,
        }
    }
}

/// One chapter after sorting and title normalization, with its final output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChapter {
    pub number: u32,
    pub title: String,
    pub start_ms: u64,
    pub duration_ms: u64,
    pub output_path: PathBuf,
}

impl PlannedChapter {
    fn label(&self) -> String {
        format!("chapter {} ({})", self.number, self.title)
    }

    fn file_result(&self) -> ChapterFileResult {
        ChapterFileResult {
            chapter_number: self.number,
            title: self.title.clone(),
            output_path: self.output_path.clone(),
            start_time_ms: self.start_ms,
            duration_ms: self.duration_ms,
        }
    }
}

/// Fixes canonical numbering: sort, normalize titles, derive file names.
pub fn plan_chapters(
    book_title: &str,
    chapters: &[ChapterRecord],
    output_dir: &Path,
    format: AudioFormat,
) -> Vec<PlannedChapter> {
    normalize_titles(&sort_by_start_time(chapters))
        .into_iter()
        .enumerate()
        .map(|(index, chapter)| {
            let number = index as u32 + 1;
            let file_name = generate_chapter_filename(book_title, number, &chapter.title, format);
            PlannedChapter {
                number,
                start_ms: chapter.start_offset_ms.max(0) as u64,
                duration_ms: chapter.length_ms.max(0) as u64,
                output_path: output_dir.join(file_name),
                title: chapter.title,
            }
        })
        .collect()
}

/// Facts established by preflight and needed afterwards.
#[derive(Debug, Clone)]
pub(crate) struct Preflight {
    pub probe: AudioProbe,
    pub input_format: AudioFormat,
}

/// Checks shared by splitting and embedding: tool, input file, probe, chapter geometry.
pub(crate) async fn preflight_input(
    cutter: &dyn AudioCutter,
    input: &Path,
    chapters: &[ChapterRecord],
    cancel: &CancellationToken,
) -> Result<Preflight, JobError> {
    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    cutter
        .check_available()
        .await
        .map_err(JobError::ToolUnavailable)?;

    let metadata = tokio::fs::metadata(input)
        .await
        .map_err(|source| JobError::InputUnreadable {
            path: input.to_path_buf(),
            source,
        })?;
    if !metadata.is_file() {
        return Err(JobError::InputNotFile(input.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(JobError::InputEmpty(input.to_path_buf()));
    }
    let input_format = AudioFormat::from_path(input)
        .ok_or_else(|| JobError::UnsupportedInput(input.to_path_buf()))?;
    tokio::fs::File::open(input)
        .await
        .map_err(|source| JobError::InputUnreadable {
            path: input.to_path_buf(),
            source,
        })?;

    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }

    let probe = cutter.probe(input).await.map_err(JobError::Probe)?;
    let duration_ms = i64::try_from(probe.duration_ms).unwrap_or(i64::MAX);

    let validation = validate_all(chapters, Some(duration_ms));
    for warning in &validation.warnings {
        tracing::warn!(input = %input.display(), "{warning}");
    }
    if !validation.is_valid {
        return Err(JobError::Validation(validation.errors));
    }

    Ok(Preflight {
        probe,
        input_format,
    })
}

struct ChapterContext {
    cutter: Arc<dyn AudioCutter>,
    tagger: Arc<dyn Tagger>,
    input: PathBuf,
    format: AudioFormat,
    overwrite: bool,
    book: BookMetadata,
    total: u32,
    verify_durations: bool,
    duration_tolerance_ms: u64,
    progress: Option<ProgressCallback>,
}

struct ChapterOutcome {
    status: ChapterStatus,
    error: Option<String>,
    warnings: Vec<String>,
}

/// Sibling path used while a chapter is being produced; the real extension stays last.
fn partial_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match output.extension() {
        Some(ext) => output.with_file_name(format!("{stem}.partial.{}", ext.to_string_lossy())),
        None => output.with_file_name(format!("{stem}.partial")),
    }
}

/// Whether both paths resolve to the same existing file.
pub(crate) async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (
        tokio::fs::canonicalize(a).await,
        tokio::fs::canonicalize(b).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), ?err, "remove leftover file"),
    }
}

impl ChapterContext {
    async fn process(&self, chapter: &PlannedChapter) -> ChapterOutcome {
        let mut warnings = Vec::new();
        let failed = |error: String, warnings: Vec<String>| ChapterOutcome {
            status: ChapterStatus::Failed,
            error: Some(error),
            warnings,
        };

        if same_file(&chapter.output_path, &self.input).await {
            return failed("output path is the input file".to_owned(), warnings);
        }

        let exists = tokio::fs::metadata(&chapter.output_path)
            .await
            .is_ok_and(|metadata| metadata.is_file());
        if exists && !self.overwrite {
            tracing::info!(
                chapter = chapter.number,
                path = %chapter.output_path.display(),
                "output exists; skipping"
            );
            return ChapterOutcome {
                status: ChapterStatus::Skipped,
                error: None,
                warnings,
            };
        }

        let partial = partial_path(&chapter.output_path);
        remove_if_present(&partial).await;

        tracing::info!(
            chapter = chapter.number,
            start_ms = chapter.start_ms,
            duration_ms = chapter.duration_ms,
            "cut chapter"
        );
        if let Err(err) = self
            .cutter
            .cut(&self.input, &partial, chapter.start_ms, chapter.duration_ms)
            .await
        {
            remove_if_present(&partial).await;
            return failed(format!("cut failed: {err}"), warnings);
        }

        if self.format.supports_tags() {
            let tags = ChapterTags::for_chapter(&self.book, chapter.number, self.total, &chapter.title);
            if let Err(err) = self.tagger.apply(&tags, &partial).await {
                tracing::warn!(chapter = chapter.number, ?err, "tagging failed");
                warnings.push(format!("{}: tagging failed: {err}", chapter.label()));
            }
        }

        if self.verify_durations {
            match self.cutter.probe(&partial).await {
                Ok(probe) => {
                    let drift = probe.duration_ms.abs_diff(chapter.duration_ms);
                    if drift > self.duration_tolerance_ms {
                        warnings.push(format!(
                            "{}: output lasts {}ms, expected {}ms",
                            chapter.label(),
                            probe.duration_ms,
                            chapter.duration_ms
                        ));
                    }
                }
                Err(err) => {
                    warnings.push(format!("{}: could not verify duration: {err}", chapter.label()));
                }
            }
        }

        if exists {
            remove_if_present(&chapter.output_path).await;
        }
        if let Err(err) = tokio::fs::rename(&partial, &chapter.output_path).await {
            remove_if_present(&partial).await;
            return failed(format!("move into place failed: {err}"), warnings);
        }

        ChapterOutcome {
            status: ChapterStatus::Written,
            error: None,
            warnings,
        }
    }

    fn report(&self, number: u32, status: ChapterStatus) {
        if let Some(progress) = &self.progress {
            progress(&ProgressEvent::ChapterFinished {
                number,
                total: self.total,
                status,
            });
        }
    }
}

/// Drives one split job from preflight to an aggregated [`SplitResult`].
pub struct SplitOrchestrator {
    cutter: Arc<dyn AudioCutter>,
    tagger: Arc<dyn Tagger>,
    processed: Option<Arc<dyn ProcessedStore>>,
    options: SplitOptions,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl SplitOrchestrator {
    pub fn new(cutter: Arc<dyn AudioCutter>, tagger: Arc<dyn Tagger>) -> Self {
        Self {
            cutter,
            tagger,
            processed: None,
            options: SplitOptions::default(),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: SplitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_processed_store(mut self, store: Arc<dyn ProcessedStore>) -> Self {
        self.processed = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Cancelling the token stops the job only while preflight is still running.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }

    /// Runs the job. `Err` means the job was aborted before any output was written; per-chapter
    /// failures are reported inside the returned result instead.
    pub async fn split(&self, job: &SplitJob) -> Result<SplitResult, JobError> {
        let preflight = self.preflight(job).await?;
        self.emit(ProgressEvent::PreflightPassed {
            duration_ms: preflight.probe.duration_ms,
            chapters: job.chapters.len(),
        });

        let plan = self.prepare(job).await?;

        let outcomes = if job.dry_run {
            self.simulate(&plan)
        } else {
            self.execute(job, &plan).await
        };

        let mut result = aggregate(&plan, outcomes);

        if !job.dry_run {
            self.finish(job, &mut result).await;
        }

        self.emit(ProgressEvent::Completed {
            processed: result.processed_chapters,
            total: result.total_chapters,
        });
        if result.success {
            tracing::info!(
                chapters = result.total_chapters,
                dry_run = job.dry_run,
                "split complete"
            );
        } else {
            tracing::warn!(
                processed = result.processed_chapters,
                total = result.total_chapters,
                errors = result.errors.len(),
                "split finished with failures"
            );
        }
        Ok(result)
    }

    async fn preflight(&self, job: &SplitJob) -> Result<Preflight, JobError> {
        let preflight =
            preflight_input(&*self.cutter, &job.input_path, &job.chapters, &self.cancel)
                .await?;

        if !preflight.input_format.can_stream_copy_to(job.format) {
            return Err(JobError::IncompatibleFormat {
                input: preflight.input_format,
                output: job.format,
            });
        }

        let required = resources::estimate_required_space(preflight.probe.size_bytes);
        let available = resources::available_space(&job.output_dir).map_err(|source| {
            JobError::SpaceQuery {
                path: job.output_dir.clone(),
                source,
            }
        })?;
        tracing::debug!(required, available, "disk space check");
        if available < required {
            return Err(JobError::InsufficientSpace {
                path: job.output_dir.clone(),
                required,
                available,
            });
        }

        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(preflight)
    }

    async fn prepare(&self, job: &SplitJob) -> Result<Vec<PlannedChapter>, JobError> {
        if !job.dry_run {
            tokio::fs::create_dir_all(&job.output_dir)
                .await
                .map_err(|source| JobError::CreateOutputDir {
                    path: job.output_dir.clone(),
                    source,
                })?;
        }
        Ok(plan_chapters(
            &job.book_title,
            &job.chapters,
            &job.output_dir,
            job.format,
        ))
    }

    fn simulate(&self, plan: &[PlannedChapter]) -> Vec<ChapterOutcome> {
        plan.iter()
            .map(|chapter| {
                tracing::info!(
                    chapter = chapter.number,
                    path = %chapter.output_path.display(),
                    "dry run: would write"
                );
                self.emit(ProgressEvent::ChapterFinished {
                    number: chapter.number,
                    total: plan.len() as u32,
                    status: ChapterStatus::Simulated,
                });
                ChapterOutcome {
                    status: ChapterStatus::Simulated,
                    error: None,
                    warnings: Vec::new(),
                }
            })
            .collect()
    }

    async fn execute(&self, job: &SplitJob, plan: &[PlannedChapter]) -> Vec<ChapterOutcome> {
        let context = Arc::new(ChapterContext {
            cutter: Arc::clone(&self.cutter),
            tagger: Arc::clone(&self.tagger),
            input: job.input_path.clone(),
            format: job.format,
            overwrite: job.overwrite,
            book: BookMetadata {
                title: job.book_title.clone(),
                ..job.metadata.clone()
            },
            total: plan.len() as u32,
            verify_durations: self.options.verify_durations,
            duration_tolerance_ms: self.options.duration_tolerance_ms,
            progress: self.progress.clone(),
        });

        let width = self
            .options
            .concurrency
            .clamp(1, resources::MAX_CONCURRENT_CUTS);
        if width != self.options.concurrency {
            tracing::warn!(
                requested = self.options.concurrency,
                width,
                "concurrency clamped"
            );
        }
        let pool = WorkerPool::new(width);
        tracing::info!(chapters = plan.len(), width = pool.width(), "cutting chapters");

        let joined = pool
            .run_all(plan.to_vec(), |chapter| {
                let context = Arc::clone(&context);
                async move {
                    let outcome = context.process(&chapter).await;
                    context.report(chapter.number, outcome.status);
                    outcome
                }
            })
            .await;

        joined
            .into_iter()
            .zip(plan)
            .map(|(joined, chapter)| match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(chapter = chapter.number, ?err, "chapter task aborted");
                    ChapterOutcome {
                        status: ChapterStatus::Failed,
                        error: Some(format!("worker aborted: {err}")),
                        warnings: Vec::new(),
                    }
                }
            })
            .collect()
    }

    /// Derived artifacts and processed bookkeeping; failures here only add warnings.
    async fn finish(&self, job: &SplitJob, result: &mut SplitResult) {
        if !result.output_files.is_empty() {
            match artifacts::write_artifacts(&job.output_dir, &job.book_title, &result.output_files)
                .await
            {
                Ok(paths) => tracing::debug!(
                    playlist = %paths.playlist.display(),
                    index = %paths.index.display(),
                    "wrote artifacts"
                ),
                Err(err) => result.warnings.push(format!("artifacts not written: {err:#}")),
            }
        }

        if let (true, Some(store)) = (result.success, &self.processed) {
            let entry = ProcessedEntry {
                input_name: input_key(&job.input_path),
                book_title: job.book_title.clone(),
                output_dir: job.output_dir.clone(),
                chapter_count: result.total_chapters,
                processed_at: Utc::now(),
            };
            if let Err(err) = store.record(entry).await {
                result
                    .warnings
                    .push(format!("processed log not updated: {err:#}"));
            }
        }
    }
}

fn aggregate(plan: &[PlannedChapter], outcomes: Vec<ChapterOutcome>) -> SplitResult {
    let mut result = SplitResult {
        total_chapters: plan.len(),
        ..SplitResult::default()
    };

    for (chapter, outcome) in plan.iter().zip(outcomes) {
        result.warnings.extend(outcome.warnings);
        match outcome.error {
            Some(error) => result.errors.push(format!("{}: {error}", chapter.label())),
            None => {
                result.processed_chapters += 1;
                result.output_files.push(chapter.file_result());
            }
        }
    }

    result.success =
        result.errors.is_empty() && result.processed_chapters == result.total_chapters;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_numbers_chapters_in_canonical_order() {
        let chapters = vec![
            ChapterRecord::new("Second", 100, 50),
            ChapterRecord::new("First: Intro", 0, 100),
        ];
        let plan = plan_chapters("Book", &chapters, Path::new("/out"), AudioFormat::Mp3);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].number, 1);
        assert_eq!(plan[0].title, "First Intro");
        assert_eq!(plan[0].output_path, PathBuf::from("/out/001 - First Intro.mp3"));
        assert_eq!(plan[1].start_ms, 100);
        assert_eq!(plan[1].duration_ms, 50);
    }

    #[tokio::test]
    async fn same_file_sees_through_relative_segments() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let input = temp.path().join("book.mp3");
        std::fs::write(&input, b"audio")?;
        std::fs::create_dir(temp.path().join("sub"))?;

        assert!(same_file(&temp.path().join("sub/../book.mp3"), &input).await);
        assert!(!same_file(&temp.path().join("other.mp3"), &input).await);
        Ok(())
    }

    #[test]
    fn partial_path_keeps_extension_last() {
        assert_eq!(
            partial_path(Path::new("/out/001 - A.m4b")),
            PathBuf::from("/out/001 - A.partial.m4b")
        );
    }

    #[test]
    fn aggregate_requires_every_chapter() {
        let plan = plan_chapters(
            "Book",
            &[ChapterRecord::new("A", 0, 10), ChapterRecord::new("B", 10, 10)],
            Path::new("/out"),
            AudioFormat::Mp3,
        );
        let ok = || ChapterOutcome {
            status: ChapterStatus::Written,
            error: None,
            warnings: Vec::new(),
        };
        let result = aggregate(
            &plan,
            vec![
                ok(),
                ChapterOutcome {
                    status: ChapterStatus::Failed,
                    error: Some("cut failed: boom".to_owned()),
                    warnings: vec!["w".to_owned()],
                },
            ],
        );
        assert!(!result.success);
        assert_eq!(result.processed_chapters, 1);
        assert_eq!(result.errors, vec!["chapter 2 (B): cut failed: boom".to_owned()]);
        assert_eq!(result.warnings, vec!["w".to_owned()]);

        let result = aggregate(&plan, vec![ok(), ok()]);
        assert!(result.success);
        assert_eq!(result.output_files.len(), 2);
    }
}
