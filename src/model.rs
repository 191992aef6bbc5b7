//! Data models for download requests and session status

use crate::error::ValidationError;
use std::{
    fmt,
    path::{Path, PathBuf},
};

/// What the external downloader should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    /// Video with its audio track merged in
    Video,
    /// Audio-only extraction
    Audio,
}

/// Resolution cap for video downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoQuality {
    Best,
    P720,
    P480,
    P360,
}

impl VideoQuality {
    pub const ALL: [VideoQuality; 4] = [Self::Best, Self::P720, Self::P480, Self::P360];

    /// Maximum frame height, or `None` for no cap
    pub fn height_cap(self) -> Option<u32> {
        match self {
            Self::Best => None,
            Self::P720 => Some(720),
            Self::P480 => Some(480),
            Self::P360 => Some(360),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Best => "Best",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::P360 => "360p",
        }
    }
}

/// Target container for video downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFormat {
    /// Keep whatever container the downloader picks
    Default,
    Mp4,
    Mkv,
    Webm,
    Avi,
    Flv,
}

impl VideoFormat {
    pub const ALL: [VideoFormat; 6] = [
        Self::Default,
        Self::Mp4,
        Self::Mkv,
        Self::Webm,
        Self::Avi,
        Self::Flv,
    ];

    /// Container name passed to `--recode-video`, `None` for the default
    pub fn container(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Mp4 => Some("mp4"),
            Self::Mkv => Some("mkv"),
            Self::Webm => Some("webm"),
            Self::Avi => Some("avi"),
            Self::Flv => Some("flv"),
        }
    }

    pub fn label(self) -> &'static str {
        self.container().unwrap_or("Default")
    }
}

/// Codec for audio extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Aac,
    Flac,
    Wav,
    M4a,
    Opus,
    Vorbis,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 7] = [
        Self::Mp3,
        Self::Aac,
        Self::Flac,
        Self::Wav,
        Self::M4a,
        Self::Opus,
        Self::Vorbis,
    ];

    pub fn codec(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::M4a => "m4a",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
        }
    }
}

/// Friendly audio quality label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioQuality {
    Best,
    High,
    Medium,
    Low,
}

impl AudioQuality {
    pub const ALL: [AudioQuality; 4] = [Self::Best, Self::High, Self::Medium, Self::Low];

    /// Value on the downloader's `--audio-quality` scale (0 is best, 9 is worst)
    pub fn scale_value(self) -> u8 {
        match self {
            Self::Best => 0,
            Self::High => 2,
            Self::Medium => 5,
            Self::Low => 9,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Best => "Best (0)",
            Self::High => "High (2)",
            Self::Medium => "Medium (5)",
            Self::Low => "Low (9)",
        }
    }
}

/// Validated, immutable description of one download.
///
/// Only obtainable through [`DownloadRequest::new`], so a value of this type
/// always has an http(s) URL and an existing output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    url: String,
    kind: DownloadKind,
    output_dir: PathBuf,
    video_quality: VideoQuality,
    video_format: VideoFormat,
    audio_format: AudioFormat,
    audio_quality: AudioQuality,
}

/// Raw user selections, as read from the form
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub url: String,
    pub kind: DownloadKind,
    pub output_dir: PathBuf,
    pub video_quality: VideoQuality,
    pub video_format: VideoFormat,
    pub audio_format: AudioFormat,
    pub audio_quality: AudioQuality,
}

impl DownloadRequest {
    /// Validates the options and creates the output directory if it is missing.
    pub fn new(options: DownloadOptions) -> Result<Self, ValidationError> {
        let url = options.url.trim();
        if url.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        if !has_http_scheme(url) {
            return Err(ValidationError::UnsupportedScheme(url.to_string()));
        }

        ensure_output_dir(&options.output_dir)?;

        Ok(Self {
            url: url.to_string(),
            kind: options.kind,
            output_dir: options.output_dir,
            video_quality: options.video_quality,
            video_format: options.video_format,
            audio_format: options.audio_format,
            audio_quality: options.audio_quality,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> DownloadKind {
        self.kind
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn video_quality(&self) -> VideoQuality {
        self.video_quality
    }

    pub fn video_format(&self) -> VideoFormat {
        self.video_format
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    pub fn audio_quality(&self) -> AudioQuality {
        self.audio_quality
    }
}

fn has_http_scheme(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    ["http://", "https://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme) && lower.len() > scheme.len())
}

fn ensure_output_dir(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::OutputDir {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no directory given"),
        });
    }
    if path.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(path).map_err(|source| ValidationError::OutputDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Default save location for a kind: `~/Videos` or `~/Music`
pub fn default_output_dir(kind: DownloadKind) -> PathBuf {
    let (known, name) = match kind {
        DownloadKind::Video => (dirs::video_dir(), "Videos"),
        DownloadKind::Audio => (dirs::audio_dir(), "Music"),
    };
    known.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(name)
    })
}

/// Swaps the output path to the new kind's default when it still points at the
/// other kind's default. Returns `None` when the path should be left alone.
pub fn output_dir_for_kind_change(current: &Path, new_kind: DownloadKind) -> Option<PathBuf> {
    let other = match new_kind {
        DownloadKind::Video => DownloadKind::Audio,
        DownloadKind::Audio => DownloadKind::Video,
    };
    (current == default_output_dir(other)).then(|| default_output_dir(new_kind))
}

/// Lifecycle of the download session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Cancelling,
}

/// How a finished download is reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Cancelled,
    /// Non-zero exit; `None` when no code was available
    Failure(Option<i32>),
    /// The downloader could not be started at all
    LaunchFailed(String),
}

/// User-facing dialogs raised by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success(String),
    Warning(String),
    Error(String),
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(msg) | Self::Warning(msg) | Self::Error(msg) => f.write_str(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(url: &str, dir: &Path) -> DownloadOptions {
        DownloadOptions {
            url: url.to_string(),
            kind: DownloadKind::Video,
            output_dir: dir.to_path_buf(),
            video_quality: VideoQuality::Best,
            video_format: VideoFormat::Default,
            audio_format: AudioFormat::Mp3,
            audio_quality: AudioQuality::Best,
        }
    }

    #[test]
    fn rejects_empty_url() {
        let tmp = TempDir::new().unwrap();
        let err = DownloadRequest::new(options("   ", tmp.path())).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyUrl));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let tmp = TempDir::new().unwrap();
        for url in ["ftp://example.com/v", "example.com/watch", "file:///etc/passwd", "https://"] {
            let err = DownloadRequest::new(options(url, tmp.path())).unwrap_err();
            assert!(matches!(err, ValidationError::UnsupportedScheme(_)), "{url}");
        }
    }

    #[test]
    fn trims_url_and_accepts_mixed_case_scheme() {
        let tmp = TempDir::new().unwrap();
        let req = DownloadRequest::new(options("  HTTPS://example.com/v  ", tmp.path())).unwrap();
        assert_eq!(req.url(), "HTTPS://example.com/v");
    }

    #[test]
    fn creates_missing_output_dir() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        let req = DownloadRequest::new(options("https://example.com/v", &nested)).unwrap();
        assert!(nested.is_dir());
        assert_eq!(req.output_dir(), nested.as_path());
    }

    #[test]
    fn uncreatable_output_dir_is_validation_error() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        let err = DownloadRequest::new(options("https://example.com/v", &file.join("sub")))
            .unwrap_err();
        assert!(matches!(err, ValidationError::OutputDir { .. }));
    }

    #[test]
    fn audio_quality_scale_is_inverted() {
        let values: Vec<u8> = AudioQuality::ALL.iter().map(|q| q.scale_value()).collect();
        assert_eq!(values, vec![0, 2, 5, 9]);
    }

    #[test]
    fn kind_change_only_swaps_default_paths() {
        let videos = default_output_dir(DownloadKind::Video);
        let music = default_output_dir(DownloadKind::Audio);
        assert_eq!(
            output_dir_for_kind_change(&videos, DownloadKind::Audio),
            Some(music.clone())
        );
        assert_eq!(output_dir_for_kind_change(&music, DownloadKind::Video), Some(videos));
        assert_eq!(
            output_dir_for_kind_change(Path::new("/srv/custom"), DownloadKind::Audio),
            None
        );
    }
}
