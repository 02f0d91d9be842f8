use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A titled time interval within an audio stream, as supplied by an untrusted source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub title: String,
    #[serde(alias = "startOffsetMs", alias = "start_ms")]
    pub start_offset_ms: i64,
    #[serde(alias = "lengthMs", alias = "duration_ms")]
    pub length_ms: i64,
}

impl ChapterRecord {
    pub fn new(title: impl Into<String>, start_offset_ms: i64, length_ms: i64) -> Self {
        Self {
            title: title.into(),
            start_offset_ms,
            length_ms,
        }
    }

    pub fn end_ms(&self) -> i64 {
        self.start_offset_ms.saturating_add(self.length_ms)
    }
}

/// Chapter data as read from disk: either a bare array or a catalog-style object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChapterSource {
    List(Vec<ChapterRecord>),
    Catalog {
        chapters: Vec<ChapterRecord>,
        #[serde(default, alias = "runtimeLengthMs")]
        runtime_length_ms: Option<i64>,
    },
}

impl ChapterSource {
    pub fn into_parts(self) -> (Vec<ChapterRecord>, Option<i64>) {
        match self {
            Self::List(chapters) => (chapters, None),
            Self::Catalog {
                chapters,
                runtime_length_ms,
            } => (chapters, runtime_length_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Index (in canonical order) of the chapter the silence follows.
    pub after_index: usize,
    pub gap_start_ms: i64,
    pub gap_end_ms: i64,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    pub gaps: Vec<Gap>,
    pub total_gap_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    M4b,
    M4a,
    Mp3,
    Aac,
    Flac,
    Ogg,
    Opus,
    Wav,
}

impl AudioFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "m4b" => Some(Self::M4b),
            "m4a" | "mp4" => Some(Self::M4a),
            "mp3" => Some(Self::Mp3),
            "aac" => Some(Self::Aac),
            "flac" => Some(Self::Flac),
            "ogg" | "oga" => Some(Self::Ogg),
            "opus" => Some(Self::Opus),
            "wav" => Some(Self::Wav),
            _ => None,
        }
    }

    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::M4b => "m4b",
            Self::M4a => "m4a",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::Opus => "opus",
            Self::Wav => "wav",
        }
    }

    fn codec_family(self) -> u8 {
        match self {
            Self::M4b | Self::M4a | Self::Aac => 0,
            Self::Mp3 => 1,
            Self::Flac => 2,
            Self::Ogg | Self::Opus => 3,
            Self::Wav => 4,
        }
    }

    /// Whether audio from `self` can be repackaged into `output` without re-encoding.
    pub fn can_stream_copy_to(self, output: Self) -> bool {
        self.codec_family() == output.codec_family()
    }

    /// Raw ADTS and WAV containers have no usable tag block.
    pub fn supports_tags(self) -> bool {
        !matches!(self, Self::Aac | Self::Wav)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| format!("unsupported audio format: {s}"))
    }
}

/// Book-level metadata shared by every output file of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterMarker {
    pub title: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Everything a tagger may write into a single file. Fields left `None` are not written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterTags {
    pub title: String,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub composer: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u16>,
    pub track: Option<(u32, u32)>,
    pub comment: Option<String>,
    pub cover_image: Option<PathBuf>,
    pub chapters: Vec<ChapterMarker>,
}

impl ChapterTags {
    /// Tags for one split-out chapter file.
    pub fn for_chapter(book: &BookMetadata, number: u32, total: u32, title: &str) -> Self {
        Self {
            title: title.to_owned(),
            album: Some(book.title.clone()),
            artist: book.author.clone(),
            album_artist: book.author.clone(),
            composer: book.narrator.clone(),
            genre: book.genre.clone(),
            year: book.year,
            track: Some((number, total)),
            comment: book.comment.clone(),
            cover_image: book.cover_image.clone(),
            chapters: Vec::new(),
        }
    }

    /// Tags for a whole-book file carrying the full chapter list.
    pub fn for_book(book: &BookMetadata, chapters: Vec<ChapterMarker>) -> Self {
        Self {
            title: book.title.clone(),
            album: Some(book.title.clone()),
            artist: book.author.clone(),
            album_artist: book.author.clone(),
            composer: book.narrator.clone(),
            genre: book.genre.clone(),
            year: book.year,
            track: None,
            comment: book.comment.clone(),
            cover_image: book.cover_image.clone(),
            chapters,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitJob {
    pub book_title: String,
    pub chapters: Vec<ChapterRecord>,
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub format: AudioFormat,
    pub dry_run: bool,
    pub overwrite: bool,
    pub metadata: BookMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFileResult {
    pub chapter_number: u32,
    pub title: String,
    pub output_path: PathBuf,
    pub start_time_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStatus {
    Success,
    PartialFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitResult {
    pub success: bool,
    pub output_files: Vec<ChapterFileResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub total_chapters: usize,
    pub processed_chapters: usize,
}

impl SplitResult {
    pub fn status(&self) -> SplitStatus {
        if self.success {
            SplitStatus::Success
        } else {
            SplitStatus::PartialFailure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_source_accepts_catalog_shape() -> anyhow::Result<()> {
        let json = r#"{
            "runtimeLengthMs": 5000,
            "chapters": [
                {"title": "Opening Credits", "startOffsetMs": 0, "lengthMs": 2000},
                {"title": "One", "startOffsetMs": 2000, "lengthMs": 3000}
            ]
        }"#;
        let source: ChapterSource = serde_json::from_str(json)?;
        let (chapters, runtime) = source.into_parts();
        assert_eq!(runtime, Some(5000));
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[1], ChapterRecord::new("One", 2000, 3000));
        Ok(())
    }

    #[test]
    fn chapter_source_accepts_bare_list() -> anyhow::Result<()> {
        let json = r#"[{"title": "A", "start_offset_ms": -5, "length_ms": 0}]"#;
        let source: ChapterSource = serde_json::from_str(json)?;
        let (chapters, runtime) = source.into_parts();
        assert_eq!(runtime, None);
        assert_eq!(chapters, vec![ChapterRecord::new("A", -5, 0)]);
        Ok(())
    }

    #[test]
    fn audio_format_parses_case_insensitively() {
        assert_eq!(AudioFormat::from_extension(".M4B"), Some(AudioFormat::M4b));
        assert_eq!(AudioFormat::from_extension("mp4"), Some(AudioFormat::M4a));
        assert_eq!(AudioFormat::from_extension("txt"), None);
        assert!(!AudioFormat::Wav.supports_tags());
        assert!(AudioFormat::Mp3.supports_tags());
    }

    #[test]
    fn chapter_tags_carry_track_position() {
        let book = BookMetadata {
            title: "Dune".to_owned(),
            author: Some("Frank Herbert".to_owned()),
            ..BookMetadata::default()
        };
        let tags = ChapterTags::for_chapter(&book, 3, 12, "Arrakis");
        assert_eq!(tags.track, Some((3, 12)));
        assert_eq!(tags.album.as_deref(), Some("Dune"));
        assert_eq!(tags.artist.as_deref(), Some("Frank Herbert"));
        assert!(tags.chapters.is_empty());
    }
}
