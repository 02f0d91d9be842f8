use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::process::{self, ToolError};
use crate::units::{format_timestamp, parse_seconds};

pub const DEFAULT_CUT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioProbe {
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub codec: String,
}

#[derive(Debug, Error)]
pub enum CutError {
    #[error("read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {reason}", .path.display())]
    NotAudio { path: PathBuf, reason: String },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Extracts time ranges from an audio container without re-encoding.
#[async_trait]
pub trait AudioCutter: Send + Sync {
    async fn check_available(&self) -> Result<(), ToolError>;

    async fn probe(&self, path: &Path) -> Result<AudioProbe, CutError>;

    /// Writes `[start_ms, start_ms + duration_ms)` of `input` to `output`, stream-copying the
    /// audio and carrying over container metadata.
    async fn cut(
        &self,
        input: &Path,
        output: &Path,
        start_ms: u64,
        duration_ms: u64,
    ) -> Result<(), CutError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    /// `None` lets a cut run indefinitely.
    pub cut_timeout: Option<Duration>,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_owned(),
            ffprobe_bin: "ffprobe".to_owned(),
            cut_timeout: Some(DEFAULT_CUT_TIMEOUT),
        }
    }
}

impl FfmpegConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ffmpeg_bin =
            std::env::var("CHAPTERSPLIT_FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin);
        let ffprobe_bin =
            std::env::var("CHAPTERSPLIT_FFPROBE_BIN").unwrap_or(defaults.ffprobe_bin);
        Self {
            ffmpeg_bin,
            ffprobe_bin,
            cut_timeout: defaults.cut_timeout,
        }
    }

    pub fn with_cut_timeout(mut self, cut_timeout: Option<Duration>) -> Self {
        self.cut_timeout = cut_timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegCutter {
    config: FfmpegConfig,
}

impl FfmpegCutter {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FfmpegConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_output(path: &Path, json: &[u8], size_bytes: u64) -> Result<AudioProbe, CutError> {
    let not_audio = |reason: &str| CutError::NotAudio {
        path: path.to_path_buf(),
        reason: reason.to_owned(),
    };

    let parsed: ProbeOutput = serde_json::from_slice(json)
        .map_err(|err| not_audio(&format!("unparseable ffprobe output: {err}")))?;
    let stream = parsed
        .streams
        .first()
        .ok_or_else(|| not_audio("no audio stream"))?;
    let codec = stream
        .codec_name
        .clone()
        .ok_or_else(|| not_audio("audio stream has no codec"))?;

    let duration_ms = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(parse_seconds)
        .or_else(|| stream.duration.as_deref().and_then(parse_seconds))
        .ok_or_else(|| not_audio("duration is unknown"))?;

    Ok(AudioProbe {
        duration_ms,
        size_bytes,
        codec,
    })
}

fn cut_args(input: &Path, output: &Path, start_ms: u64, duration_ms: u64) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push("-ss".into());
    args.push(format_timestamp(start_ms).into());
    args.push("-i".into());
    args.push(input.as_os_str().to_owned());
    args.push("-t".into());
    args.push(format_timestamp(duration_ms).into());
    for arg in ["-map", "0:a", "-map_metadata", "0", "-map_chapters", "-1", "-c", "copy"] {
        args.push(arg.into());
    }
    args.push(output.as_os_str().to_owned());
    args
}

#[async_trait]
impl AudioCutter for FfmpegCutter {
    async fn check_available(&self) -> Result<(), ToolError> {
        process::check_available(&self.config.ffmpeg_bin).await?;
        process::check_available(&self.config.ffprobe_bin).await
    }

    async fn probe(&self, path: &Path) -> Result<AudioProbe, CutError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| CutError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;

        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-select_streams".into(),
            "a:0".into(),
            "-show_entries".into(),
            "format=duration:stream=codec_name,duration".into(),
            "-of".into(),
            "json".into(),
            path.as_os_str().to_owned(),
        ];
        let output = process::run(&self.config.ffprobe_bin, &args, Some(Duration::from_secs(60)))
            .await?;
        parse_probe_output(path, &output.stdout, metadata.len())
    }

    async fn cut(
        &self,
        input: &Path,
        output: &Path,
        start_ms: u64,
        duration_ms: u64,
    ) -> Result<(), CutError> {
        tracing::debug!(
            input = %input.display(),
            output = %output.display(),
            start_ms,
            duration_ms,
            "ffmpeg cut"
        );
        let args = cut_args(input, output, start_ms, duration_ms);
        process::run(&self.config.ffmpeg_bin, &args, self.config.cut_timeout).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_output_prefers_container_duration() -> anyhow::Result<()> {
        let json = br#"{
            "streams": [{"codec_name": "aac", "duration": "10.000"}],
            "format": {"duration": "12.345678"}
        }"#;
        let probe = parse_probe_output(Path::new("book.m4b"), json, 2048)?;
        assert_eq!(
            probe,
            AudioProbe {
                duration_ms: 12_346,
                size_bytes: 2048,
                codec: "aac".to_owned(),
            }
        );
        Ok(())
    }

    #[test]
    fn probe_output_falls_back_to_stream_duration() -> anyhow::Result<()> {
        let json = br#"{"streams": [{"codec_name": "mp3", "duration": "3.5"}], "format": {}}"#;
        let probe = parse_probe_output(Path::new("a.mp3"), json, 1)?;
        assert_eq!(probe.duration_ms, 3_500);
        Ok(())
    }

    #[test]
    fn probe_output_without_audio_stream_is_rejected() {
        let json = br#"{"streams": [], "format": {"duration": "1.0"}}"#;
        let err = parse_probe_output(Path::new("cover.jpg"), json, 1).unwrap_err();
        assert!(err.to_string().contains("no audio stream"), "{err}");
    }

    #[test]
    fn cut_args_stream_copy_the_range() {
        let args = cut_args(Path::new("in.m4b"), Path::new("out.m4b"), 61_500, 2_000);
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let joined = args.join(" ");
        assert!(joined.contains("-ss 00:01:01.500 -i in.m4b -t 00:00:02.000"));
        assert!(joined.contains("-c copy"));
        assert!(joined.contains("-map_metadata 0"));
        assert_eq!(args.last().map(String::as_str), Some("out.m4b"));
    }
}
