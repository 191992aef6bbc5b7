//! Error types for the download session.

use std::path::PathBuf;
use thiserror::Error;

/// Problems with user input, reported before any process is started.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Please enter a video URL")]
    EmptyUrl,

    #[error("Please enter a valid http(s) URL, got '{0}'")]
    UnsupportedScheme(String),

    #[error("Could not create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The external program could not be started.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("{program} was not found. Is it installed?")]
    NotFound { program: String },

    #[error("{program} failed to start: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    pub fn from_spawn(program: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                program: program.to_string(),
            }
        } else {
            Self::Spawn {
                program: program.to_string(),
                source,
            }
        }
    }
}

/// Reasons `start_download` refuses to start.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A download is already in progress")]
    Busy,

    #[error("Missing dependencies: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
