use std::ffi::OsString;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::formats::{AudioFormat, ChapterTags};
use crate::process::{self, ToolError};

#[derive(Debug, Error)]
pub enum TagError {
    #[error("{}: no tag-capable container", .0.display())]
    Unsupported(PathBuf),

    #[error("write metadata file: {0}")]
    MetadataFile(#[source] io::Error),

    #[error("replace {}: {source}", .path.display())]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Embeds metadata into one audio file in place.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn apply(&self, tags: &ChapterTags, path: &Path) -> Result<(), TagError>;
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '=' | ';' | '#' | '\\' | '\n') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Renders tags in ffmpeg's `FFMETADATA1` format, including one `[CHAPTER]` block per marker.
pub fn render_ffmetadata(tags: &ChapterTags) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    let mut field = |key: &str, value: Option<&str>| {
        if let Some(value) = value {
            let _ = writeln!(out, "{key}={}", escape(value));
        }
    };

    field("title", Some(&tags.title));
    field("album", tags.album.as_deref());
    field("artist", tags.artist.as_deref());
    field("album_artist", tags.album_artist.as_deref());
    field("composer", tags.composer.as_deref());
    field("genre", tags.genre.as_deref());
    field("date", tags.year.map(|y| y.to_string()).as_deref());
    field(
        "track",
        tags.track
            .map(|(number, total)| format!("{number}/{total}"))
            .as_deref(),
    );
    field("comment", tags.comment.as_deref());

    for marker in &tags.chapters {
        let _ = write!(
            out,
            "\n[CHAPTER]\nTIMEBASE=1/1000\nSTART={}\nEND={}\ntitle={}\n",
            marker.start_ms,
            marker.end_ms,
            escape(&marker.title)
        );
    }
    out
}

#[derive(Debug, Clone)]
pub struct FfmpegTagger {
    ffmpeg_bin: String,
    timeout: Duration,
}

impl FfmpegTagger {
    pub fn new(ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Sibling path that keeps the real extension last, so ffmpeg picks the same muxer.
fn scratch_path(path: &Path, label: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!(".{stem}.{label}-{}.{ext}", &id[..8]))
}

fn tag_args(
    input: &Path,
    metadata: &Path,
    cover: Option<&Path>,
    format: AudioFormat,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push("-i".into());
    args.push(input.as_os_str().to_owned());
    args.push("-i".into());
    args.push(metadata.as_os_str().to_owned());
    if let Some(cover) = cover {
        args.push("-i".into());
        args.push(cover.as_os_str().to_owned());
    }

    for arg in ["-map", "0:a", "-map_metadata", "1", "-map_chapters", "1"] {
        args.push(arg.into());
    }
    if cover.is_some() {
        for arg in ["-map", "2:v", "-disposition:v:0", "attached_pic"] {
            args.push(arg.into());
        }
    }
    args.push("-c".into());
    args.push("copy".into());
    if format == AudioFormat::Mp3 {
        args.push("-id3v2_version".into());
        args.push("3".into());
    }
    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl Tagger for FfmpegTagger {
    async fn apply(&self, tags: &ChapterTags, path: &Path) -> Result<(), TagError> {
        let format = AudioFormat::from_path(path)
            .filter(|f| f.supports_tags())
            .ok_or_else(|| TagError::Unsupported(path.to_path_buf()))?;

        let metadata = tempfile::Builder::new()
            .prefix("chaptersplit-")
            .suffix(".ffmeta")
            .tempfile()
            .map_err(TagError::MetadataFile)?;
        tokio::fs::write(metadata.path(), render_ffmetadata(tags))
            .await
            .map_err(TagError::MetadataFile)?;

        // Ogg muxers cannot carry attached pictures as a video stream.
        let cover = tags
            .cover_image
            .as_deref()
            .filter(|_| !matches!(format, AudioFormat::Ogg | AudioFormat::Opus));
        if tags.cover_image.is_some() && cover.is_none() {
            tracing::debug!(path = %path.display(), "cover art skipped for ogg container");
        }

        let scratch = scratch_path(path, "tagging");
        let args = tag_args(path, metadata.path(), cover, format, &scratch);
        if let Err(err) = process::run(&self.ffmpeg_bin, &args, Some(self.timeout)).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(err.into());
        }

        if let Err(source) = tokio::fs::rename(&scratch, path).await {
            let _ = tokio::fs::remove_file(&scratch).await;
            return Err(TagError::Replace {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}
