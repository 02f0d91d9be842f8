use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::formats::ChapterFileResult;
use crate::processed::write_atomic;
use crate::sanitize::{MAX_FILENAME_LEN, sanitize};
use crate::units::whole_seconds;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexChapter {
    pub number: u32,
    pub title: String,
    pub filename: String,
    pub start_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterIndex {
    pub book_title: String,
    pub chapter_count: usize,
    pub total_duration_ms: u64,
    pub chapters: Vec<IndexChapter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub playlist: PathBuf,
    pub index: PathBuf,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sorted(files: &[ChapterFileResult]) -> Vec<&ChapterFileResult> {
    let mut files: Vec<_> = files.iter().collect();
    files.sort_by_key(|f| f.chapter_number);
    files
}

/// Extended M3U with entries relative to the playlist's own directory.
pub fn render_playlist(files: &[ChapterFileResult]) -> String {
    let mut m3u = String::from("#EXTM3U\n");
    for file in sorted(files) {
        let _ = writeln!(
            m3u,
            "#EXTINF:{},{}",
            whole_seconds(file.duration_ms),
            file.title.replace(['\r', '\n'], " ")
        );
        let _ = writeln!(m3u, "{}", file_name(&file.output_path));
    }
    m3u
}

pub fn build_index(book_title: &str, files: &[ChapterFileResult]) -> ChapterIndex {
    let chapters: Vec<IndexChapter> = sorted(files)
        .into_iter()
        .map(|file| IndexChapter {
            number: file.chapter_number,
            title: file.title.clone(),
            filename: file_name(&file.output_path),
            start_ms: file.start_time_ms,
            duration_ms: file.duration_ms,
        })
        .collect();

    ChapterIndex {
        book_title: book_title.to_owned(),
        chapter_count: chapters.len(),
        total_duration_ms: chapters.iter().map(|c| c.duration_ms).sum(),
        chapters,
    }
}

/// Writes `<book>.m3u` and `<book>.index.json` next to the chapter files. Both are derived and
/// overwritten on every run.
pub async fn write_artifacts(
    output_dir: &Path,
    book_title: &str,
    files: &[ChapterFileResult],
) -> anyhow::Result<ArtifactPaths> {
    let base = sanitize(book_title, MAX_FILENAME_LEN - ".index.json".len());
    let playlist = output_dir.join(format!("{base}.m3u"));
    let index = output_dir.join(format!("{base}.index.json"));

    write_atomic(&playlist, render_playlist(files).as_bytes())
        .await
        .with_context(|| format!("write playlist: {}", playlist.display()))?;

    let json = serde_json::to_vec_pretty(&build_index(book_title, files))
        .context("serialize chapter index")?;
    write_atomic(&index, &json)
        .await
        .with_context(|| format!("write chapter index: {}", index.display()))?;

    Ok(ArtifactPaths { playlist, index })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(number: u32, title: &str, start: u64, duration: u64) -> ChapterFileResult {
        ChapterFileResult {
            chapter_number: number,
            title: title.to_owned(),
            output_path: PathBuf::from(format!("/out/{number:03} - {title}.mp3")),
            start_time_ms: start,
            duration_ms: duration,
        }
    }

    #[test]
    fn playlist_is_ordered_by_chapter_number() {
        let files = vec![file(2, "Two", 61_000, 1_499), file(1, "One", 0, 61_000)];
        assert_eq!(
            render_playlist(&files),
            "#EXTM3U\n#EXTINF:61,One\n001 - One.mp3\n#EXTINF:1,Two\n002 - Two.mp3\n"
        );
    }

    #[test]
    fn index_aggregates_duration() {
        let files = vec![file(2, "Two", 100, 250), file(1, "One", 0, 100)];
        let index = build_index("Book", &files);
        assert_eq!(index.chapter_count, 2);
        assert_eq!(index.total_duration_ms, 350);
        assert_eq!(index.chapters[0].number, 1);
        assert_eq!(index.chapters[1].filename, "002 - Two.mp3");
    }

    #[tokio::test]
    async fn artifacts_land_in_output_dir() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let files = vec![file(1, "One", 0, 1_000)];
        let paths = write_artifacts(temp.path(), "My: Book", &files).await?;

        assert_eq!(paths.playlist, temp.path().join("My Book.m3u"));
        let index: ChapterIndex =
            serde_json::from_slice(&std::fs::read(&paths.index)?)?;
        assert_eq!(index.book_title, "My: Book");
        assert_eq!(index.chapters.len(), 1);
        Ok(())
    }
}
