//! Startup check for the external tools the downloader needs.

use tracing::warn;

/// Returns the tools from `required` that are not on `PATH`, in order.
pub fn missing_tools<'a, I>(required: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let missing: Vec<String> = required
        .into_iter()
        .filter(|tool| which::which(tool).is_err())
        .map(str::to_owned)
        .collect();
    if !missing.is_empty() {
        warn!(missing = %missing.join(", "), "required tools not found in PATH");
    }
    missing
}

/// Text of the blocking startup warning.
pub fn missing_tools_message(missing: &[String]) -> String {
    format!(
        "The following required tools were not found in your PATH:\n\n{}\n\n\
         Please install them to use this application.",
        missing.join(", ")
    )
}
