use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::cutter::AudioCutter;
use crate::error::JobError;
use crate::formats::{AudioFormat, BookMetadata, ChapterMarker, ChapterRecord, ChapterTags};
use crate::sanitize::generate_unique_filename;
use crate::split::{preflight_input, same_file};
use crate::tagger::Tagger;
use crate::validate::{normalize_titles, sort_by_start_time};

#[derive(Debug, Clone)]
pub struct EmbedRequest {
    pub input_path: PathBuf,
    pub chapters: Vec<ChapterRecord>,
    pub metadata: BookMetadata,
    /// Defaults to a free `<stem> (chaptered).<ext>` next to the input.
    pub output_path: Option<PathBuf>,
}

pub fn chapter_markers(chapters: &[ChapterRecord]) -> Vec<ChapterMarker> {
    normalize_titles(&sort_by_start_time(chapters))
        .into_iter()
        .map(|chapter| {
            let start_ms = chapter.start_offset_ms.max(0) as u64;
            ChapterMarker {
                start_ms,
                end_ms: start_ms + chapter.length_ms.max(0) as u64,
                title: chapter.title,
            }
        })
        .collect()
}

fn default_output_path(input: &Path, format: AudioFormat) -> PathBuf {
    let dir = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audiobook".to_owned());
    let name = format!("{stem} (chaptered).{}", format.extension());
    dir.join(generate_unique_filename(dir, &name))
}

/// Writes a copy of the input whose container carries the book tags and the full chapter list.
/// Returns the path of the written file.
pub async fn embed(
    cutter: &dyn AudioCutter,
    tagger: &dyn Tagger,
    request: &EmbedRequest,
    cancel: &CancellationToken,
) -> Result<PathBuf, JobError> {
    let preflight = preflight_input(cutter, &request.input_path, &request.chapters, cancel).await?;
    if !preflight.input_format.supports_tags() {
        return Err(JobError::UnsupportedInput(request.input_path.clone()));
    }

    let output = match &request.output_path {
        Some(path) => path.clone(),
        None => default_output_path(&request.input_path, preflight.input_format),
    };
    if same_file(&output, &request.input_path).await {
        return Err(JobError::OutputIsInput(output));
    }

    tokio::fs::copy(&request.input_path, &output)
        .await
        .map_err(|source| JobError::CopyInput {
            from: request.input_path.clone(),
            to: output.clone(),
            source,
        })?;

    let markers = chapter_markers(&request.chapters);
    tracing::info!(
        output = %output.display(),
        chapters = markers.len(),
        "embed chapters"
    );
    let tags = ChapterTags::for_book(&request.metadata, markers);
    if let Err(err) = tagger.apply(&tags, &output).await {
        let _ = tokio::fs::remove_file(&output).await;
        return Err(JobError::Tag(err));
    }
    Ok(output)
}
