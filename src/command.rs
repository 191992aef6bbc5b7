//! Argument vector for the external downloader.

use crate::model::{DownloadKind, DownloadRequest};
use std::ffi::OsString;

/// Output file name template, relative to the `-P` directory
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Format selector for a height cap, `None` meaning best available.
pub fn format_selector(height_cap: Option<u32>) -> String {
    match height_cap {
        None => "bestvideo+bestaudio/best".to_owned(),
        Some(h) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]"),
    }
}

/// Builds the discrete argument list for one download.
///
/// Every user-supplied value (URL, directory) is its own element; nothing is
/// joined into a shell string. The URL is always last, preceded by `--`.
pub fn build_args(request: &DownloadRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(16);

    // One progress line per update, no ANSI colours
    args.push("--newline".into());
    args.push("--no-colors".into());

    args.push("-P".into());
    args.push(request.output_dir().as_os_str().to_owned());
    args.push("-o".into());
    args.push(OUTPUT_TEMPLATE.into());

    match request.kind() {
        DownloadKind::Video => {
            args.push("-f".into());
            args.push(format_selector(request.video_quality().height_cap()).into());
            if let Some(container) = request.video_format().container() {
                args.push("--recode-video".into());
                args.push(container.into());
            }
        }
        DownloadKind::Audio => {
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push(request.audio_format().codec().into());
            args.push("--audio-quality".into());
            args.push(request.audio_quality().scale_value().to_string().into());
        }
    }

    args.push("--".into());
    args.push(request.url().into());
    args
}

/// Human-readable rendering for the log view. Not for execution.
pub fn display_command(program: &str, args: &[OsString]) -> String {
    let rendered: Vec<String> = args
        .iter()
        .map(|a| format!("{:?}", a.to_string_lossy()))
        .collect();
    format!("{} [{}]", program, rendered.join(", "))
}
