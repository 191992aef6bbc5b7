//! Desktop front-end core for an external media downloader.
//!
//! Builds the downloader's argument vector, supervises the child process,
//! parses its progress output and drives a single download session.

pub mod command;
pub mod config;
pub mod deps;
pub mod error;
pub mod model;
pub mod process;
pub mod progress;
pub mod session;

pub use config::{AppConfig, JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore};
pub use error::{LaunchError, SessionError, ValidationError};
pub use model::{DownloadKind, DownloadOptions, DownloadRequest, Notification, Outcome, SessionState};
pub use process::{Launcher, Strategy};
pub use session::{DownloadSession, SessionSink};
