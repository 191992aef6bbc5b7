//! Download session controller.
//!
//! The only owner of [`SessionState`] and of the live [`ProcessHandle`]. It
//! turns user actions and process events into log text, progress updates and
//! notifications on a [`SessionSink`] owned by the UI. All mutation happens on
//! the caller's thread; process events are drained by [`DownloadSession::pump`].

use crate::{
    command::{build_args, display_command},
    config::{PreferenceStore, Preferences},
    error::SessionError,
    model::{DownloadOptions, DownloadRequest, Notification, Outcome, SessionState},
    process::{
        Completion, EventReceiver, ExitKind, Launcher, OutputStream, ProcessEvent, ProcessHandle,
    },
    progress::{LineSplitter, parse_progress_from_line},
};
use std::path::Path;
use tokio::sync::mpsc::{error::TryRecvError, unbounded_channel};
use tracing::{debug, info, warn};

/// UI-side receiver of everything the session wants displayed.
pub trait SessionSink {
    fn clear_log(&mut self);
    fn append_log(&mut self, text: &str);
    /// Percentage in `[0, 100]`
    fn set_progress(&mut self, percent: f32);
    fn notify(&mut self, notification: Notification);
}

pub struct DownloadSession {
    launcher: Box<dyn Launcher>,
    prefs: Box<dyn PreferenceStore>,
    program: String,
    missing_tools: Vec<String>,
    state: SessionState,
    process: Option<ProcessHandle>,
    events: Option<EventReceiver>,
    stdout_lines: LineSplitter,
    stderr_lines: LineSplitter,
    last_outcome: Option<Outcome>,
}

impl DownloadSession {
    pub fn new(
        launcher: Box<dyn Launcher>,
        prefs: Box<dyn PreferenceStore>,
        program: impl Into<String>,
    ) -> Self {
        Self {
            launcher,
            prefs,
            program: program.into(),
            missing_tools: Vec::new(),
            state: SessionState::Idle,
            process: None,
            events: None,
            stdout_lines: LineSplitter::default(),
            stderr_lines: LineSplitter::default(),
            last_outcome: None,
        }
    }

    /// Blocks downloads until the named tools are installed.
    pub fn with_missing_tools(mut self, missing: Vec<String>) -> Self {
        self.missing_tools = missing;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn missing_tools(&self) -> &[String] {
        &self.missing_tools
    }

    pub fn download_enabled(&self) -> bool {
        self.state == SessionState::Idle && self.missing_tools.is_empty()
    }

    pub fn cancel_enabled(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last_outcome.as_ref()
    }

    pub fn preferences(&self) -> Preferences {
        self.prefs.load()
    }

    /// Persists a folder the user picked. Failures are logged only.
    pub fn remember_output_dir(&mut self, dir: &Path) {
        if let Err(e) = self.prefs.remember_download_path(dir) {
            warn!("Failed to save last download path: {:#}", e);
        }
    }

    /// Validates the options and starts the downloader.
    ///
    /// Validation problems leave the session untouched. A launch failure is
    /// not an error here: it is reported as [`Outcome::LaunchFailed`] and the
    /// session is back in `Idle` when this returns.
    pub fn start_download(
        &mut self,
        options: DownloadOptions,
        sink: &mut dyn SessionSink,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            debug!(state = ?self.state, "start ignored while busy");
            return Err(SessionError::Busy);
        }
        if !self.missing_tools.is_empty() {
            let err = SessionError::MissingTools(self.missing_tools.clone());
            sink.notify(Notification::Warning(err.to_string()));
            return Err(err);
        }
        let request = match DownloadRequest::new(options) {
            Ok(request) => request,
            Err(e) => {
                sink.notify(Notification::Warning(e.to_string()));
                return Err(e.into());
            }
        };

        self.state = SessionState::Running;
        self.last_outcome = None;
        self.remember_output_dir(request.output_dir());

        let args = build_args(&request);

        sink.clear_log();
        sink.set_progress(0.0);
        sink.append_log(&format!(
            "Starting download...\nTarget: {}\n",
            request.output_dir().display()
        ));
        sink.append_log(&format!(
            "Executing: {}\n\n",
            display_command(&self.program, &args)
        ));

        let (tx, rx) = unbounded_channel();
        match ProcessHandle::start(self.launcher.as_ref(), &self.program, &args, tx) {
            Ok(handle) => {
                info!(url = request.url(), pid = ?handle.pid(), "download started");
                self.process = Some(handle);
                self.events = Some(rx);
                self.stdout_lines = LineSplitter::default();
                self.stderr_lines = LineSplitter::default();
            }
            Err(e) => {
                warn!("{}", e);
                self.finish(Outcome::LaunchFailed(e.to_string()), sink);
            }
        }
        Ok(())
    }

    /// Kills the running download. No-op unless `Running`.
    pub fn cancel_download(&mut self, sink: &mut dyn SessionSink) {
        if self.state != SessionState::Running {
            return;
        }
        self.state = SessionState::Cancelling;
        sink.append_log("\nCancelling download...\n");
        if let Some(process) = self.process.as_mut() {
            info!(pid = ?process.pid(), "cancelling download");
            process.cancel();
        }
    }

    /// Applies every pending process event. Never blocks.
    ///
    /// Returns `true` if anything was applied.
    pub fn pump(&mut self, sink: &mut dyn SessionSink) -> bool {
        let mut applied = false;
        loop {
            let Some(events) = self.events.as_mut() else {
                return applied;
            };
            match events.try_recv() {
                Ok(ProcessEvent::Output { stream, text }) => {
                    applied = true;
                    self.on_output(stream, &text, sink);
                }
                Ok(ProcessEvent::Exited(completion)) => {
                    self.on_exit(completion, sink);
                    return true;
                }
                Err(TryRecvError::Empty) => return applied,
                Err(TryRecvError::Disconnected) => {
                    warn!("process supervisor went away without an exit status");
                    self.on_exit(
                        Completion {
                            code: None,
                            kind: ExitKind::Killed,
                        },
                        sink,
                    );
                    return true;
                }
            }
        }
    }

    fn on_output(&mut self, stream: OutputStream, text: &str, sink: &mut dyn SessionSink) {
        sink.append_log(text);
        let splitter = match stream {
            OutputStream::Stdout => &mut self.stdout_lines,
            OutputStream::Stderr => &mut self.stderr_lines,
        };
        for line in splitter.push(text) {
            if let Some(pct) = parse_progress_from_line(&line) {
                sink.set_progress(pct);
            }
        }
    }

    fn on_exit(&mut self, completion: Completion, sink: &mut dyn SessionSink) {
        for tail in [self.stdout_lines.flush(), self.stderr_lines.flush()]
            .into_iter()
            .flatten()
        {
            if let Some(pct) = parse_progress_from_line(&tail) {
                sink.set_progress(pct);
            }
        }
        if let Some(process) = self.process.as_mut() {
            process.finish(&completion);
        }

        let cancelling = self.state == SessionState::Cancelling;
        let outcome = if completion.is_success() {
            Outcome::Success
        } else if completion.kind == ExitKind::Killed || cancelling {
            Outcome::Cancelled
        } else {
            Outcome::Failure(completion.code)
        };
        info!(?outcome, code = ?completion.code, "download finished");
        self.finish(outcome, sink);
    }

    fn finish(&mut self, outcome: Outcome, sink: &mut dyn SessionSink) {
        match &outcome {
            Outcome::Success => {
                sink.set_progress(100.0);
                sink.notify(Notification::Success(
                    "Download completed successfully!".to_string(),
                ));
                sink.append_log("\nDone.\n");
            }
            Outcome::Cancelled => {
                sink.append_log("\nProcess cancelled or crashed.\n");
                sink.set_progress(0.0);
            }
            Outcome::Failure(code) => {
                let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
                sink.notify(Notification::Error(format!(
                    "Download failed with exit code {code}. Check logs."
                )));
                sink.append_log(&format!("\nFailed (Code {code}).\n"));
            }
            Outcome::LaunchFailed(reason) => {
                sink.notify(Notification::Error(format!(
                    "{} failed to start. Is it installed?\n\n{}",
                    self.program, reason
                )));
                sink.append_log(&format!("\nCould not start {}: {}\n", self.program, reason));
            }
        }

        self.state = SessionState::Idle;
        self.process = None;
        self.events = None;
        self.last_outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryPreferenceStore;
    use crate::error::LaunchError;
    use crate::model::{AudioFormat, AudioQuality, DownloadKind, VideoFormat, VideoQuality};
    use crate::process::{EventSender, ProcessControl};
    use std::{
        cell::RefCell,
        ffi::OsString,
        path::PathBuf,
        rc::Rc,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        log: String,
        progress: f32,
        progress_updates: Vec<f32>,
        notifications: Vec<Notification>,
    }

    impl SessionSink for RecordingSink {
        fn clear_log(&mut self) {
            self.log.clear();
        }

        fn append_log(&mut self, text: &str) {
            self.log.push_str(text);
        }

        fn set_progress(&mut self, percent: f32) {
            self.progress = percent;
            self.progress_updates.push(percent);
        }

        fn notify(&mut self, notification: Notification) {
            self.notifications.push(notification);
        }
    }

    impl RecordingSink {
        fn errors(&self) -> usize {
            self.notifications
                .iter()
                .filter(|n| matches!(n, Notification::Error(_)))
                .count()
        }
    }

    /// Stands in for the downloader: the test plays the process by sending
    /// events; `cancel` behaves like a kill and emits a killed exit.
    #[derive(Default)]
    struct Script {
        launches: Vec<(String, Vec<OsString>)>,
        sender: Option<EventSender>,
        fail_launch: bool,
    }

    struct ScriptedLauncher {
        script: Rc<RefCell<Script>>,
        cancels: Arc<AtomicUsize>,
    }

    struct ScriptedProcess {
        sender: EventSender,
        cancels: Arc<AtomicUsize>,
    }

    impl ProcessControl for ScriptedProcess {
        fn pid(&self) -> Option<u32> {
            Some(4242)
        }

        fn cancel(&mut self) {
            if self.cancels.fetch_add(1, Ordering::SeqCst) == 0 {
                let _ = self.sender.send(ProcessEvent::Exited(Completion {
                    code: None,
                    kind: ExitKind::Killed,
                }));
            }
        }
    }

    impl Launcher for ScriptedLauncher {
        fn launch(
            &self,
            program: &str,
            args: &[OsString],
            events: EventSender,
        ) -> Result<Box<dyn ProcessControl>, LaunchError> {
            let mut script = self.script.borrow_mut();
            script.launches.push((program.to_string(), args.to_vec()));
            if script.fail_launch {
                return Err(LaunchError::NotFound {
                    program: program.to_string(),
                });
            }
            script.sender = Some(events.clone());
            Ok(Box::new(ScriptedProcess {
                sender: events,
                cancels: Arc::clone(&self.cancels),
            }))
        }
    }

    struct Harness {
        session: DownloadSession,
        script: Rc<RefCell<Script>>,
        cancels: Arc<AtomicUsize>,
        sink: RecordingSink,
        tmp: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_missing_tools(Vec::new())
        }

        fn with_missing_tools(missing: Vec<String>) -> Self {
            let script = Rc::new(RefCell::new(Script::default()));
            let cancels = Arc::new(AtomicUsize::new(0));
            let launcher = ScriptedLauncher {
                script: Rc::clone(&script),
                cancels: Arc::clone(&cancels),
            };
            Self {
                session: DownloadSession::new(
                    Box::new(launcher),
                    Box::new(MemoryPreferenceStore::default()),
                    "yt-dlp",
                )
                .with_missing_tools(missing),
                script,
                cancels,
                sink: RecordingSink::default(),
                tmp: TempDir::new().unwrap(),
            }
        }

        fn options(&self, url: &str) -> DownloadOptions {
            DownloadOptions {
                url: url.to_string(),
                kind: DownloadKind::Video,
                output_dir: self.tmp.path().join("out"),
                video_quality: VideoQuality::P720,
                video_format: VideoFormat::Default,
                audio_format: AudioFormat::Mp3,
                audio_quality: AudioQuality::Best,
            }
        }

        fn start(&mut self) -> Result<(), SessionError> {
            let options = self.options("https://example/video");
            self.session.start_download(options, &mut self.sink)
        }

        fn emit(&self, text: &str) {
            let script = self.script.borrow();
            let sender = script.sender.as_ref().unwrap();
            sender
                .send(ProcessEvent::Output {
                    stream: OutputStream::Stdout,
                    text: text.to_string(),
                })
                .unwrap();
        }

        fn exit(&self, code: i32) {
            let script = self.script.borrow();
            script
                .sender
                .as_ref()
                .unwrap()
                .send(ProcessEvent::Exited(Completion {
                    code: Some(code),
                    kind: ExitKind::Normal,
                }))
                .unwrap();
        }

        fn pump(&mut self) -> bool {
            self.session.pump(&mut self.sink)
        }

        fn launched_args(&self) -> Vec<String> {
            let script = self.script.borrow();
            script.launches[0]
                .1
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect()
        }
    }

    #[test]
    fn video_720_download_runs_to_success() {
        let mut h = Harness::new();
        h.start().unwrap();

        assert_eq!(h.session.state(), SessionState::Running);
        assert!(!h.session.download_enabled());
        assert!(h.session.cancel_enabled());

        let args = h.launched_args();
        assert!(args.contains(&"bestvideo[height<=720]+bestaudio/best[height<=720]".to_string()));
        assert!(!args.contains(&"--recode-video".to_string()));
        assert_eq!(h.script.borrow().launches[0].0, "yt-dlp");
        assert!(h.sink.log.contains("Executing: yt-dlp"));

        h.emit("[youtube] abc: Downloading webpage\n");
        h.emit("[download]  10.0% of 10.00MiB at 1.2MiB/s\n");
        h.emit("[download]  55.5% of 10.00MiB at 1.2MiB/s\n");
        assert!(h.pump());
        assert_eq!(h.sink.progress, 55.5);
        assert_eq!(h.session.state(), SessionState::Running);

        h.emit("[download] 100.0% of 10.00MiB in 00:08\n");
        h.exit(0);
        h.pump();

        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.last_outcome(), Some(&Outcome::Success));
        assert_eq!(h.sink.progress, 100.0);
        assert!(matches!(h.sink.notifications.as_slice(), [Notification::Success(_)]));
        assert!(h.sink.log.ends_with("Done.\n"));
        assert!(h.session.download_enabled());
        assert!(!h.session.cancel_enabled());
    }

    #[test]
    fn cancel_mid_run_resets_progress_and_reenables_trigger() {
        let mut h = Harness::new();
        h.start().unwrap();
        h.emit("[download]  40.0% of 10.00MiB\n");
        h.pump();
        assert_eq!(h.sink.progress, 40.0);

        h.session.cancel_download(&mut h.sink);
        assert_eq!(h.session.state(), SessionState::Cancelling);
        assert!(!h.session.cancel_enabled());
        assert!(!h.session.download_enabled());
        assert_eq!(h.cancels.load(Ordering::SeqCst), 1);

        h.session.cancel_download(&mut h.sink);
        assert_eq!(h.cancels.load(Ordering::SeqCst), 1);

        h.pump();
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.last_outcome(), Some(&Outcome::Cancelled));
        assert_eq!(h.sink.progress, 0.0);
        assert_eq!(h.sink.errors(), 0);
        assert!(h.sink.log.contains("Cancelling download..."));
        assert!(h.session.download_enabled());
    }

    #[test]
    fn cancel_while_idle_does_nothing() {
        let mut h = Harness::new();
        h.session.cancel_download(&mut h.sink);
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.sink.log.is_empty());
        assert!(h.sink.notifications.is_empty());
        assert!(!h.pump());
    }

    #[test]
    fn stays_busy_until_process_exits() {
        let mut h = Harness::new();
        h.start().unwrap();
        assert!(!h.pump());
        assert_eq!(h.session.state(), SessionState::Running);

        h.emit("[download] 100.0% of 1MiB\n");
        h.pump();
        assert_eq!(h.session.state(), SessionState::Running);
        assert!(!h.session.download_enabled());

        h.exit(0);
        h.pump();
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let mut h = Harness::new();
        h.start().unwrap();
        assert!(matches!(h.start(), Err(SessionError::Busy)));
        assert_eq!(h.script.borrow().launches.len(), 1);
    }

    #[test]
    fn invalid_url_changes_nothing() {
        let mut h = Harness::new();
        let options = h.options("   ");
        let err = h.session.start_download(options, &mut h.sink).unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.script.borrow().launches.is_empty());
        assert!(matches!(h.sink.notifications.as_slice(), [Notification::Warning(_)]));
        assert_eq!(h.session.preferences().last_download_path, None);

        let options = h.options("ftp://example/video");
        assert!(h.session.start_download(options, &mut h.sink).is_err());
        assert!(h.script.borrow().launches.is_empty());
    }

    #[test]
    fn launch_failure_is_reported_and_returns_to_idle() {
        let mut h = Harness::new();
        h.script.borrow_mut().fail_launch = true;
        h.start().unwrap();

        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(matches!(h.session.last_outcome(), Some(Outcome::LaunchFailed(_))));
        assert_eq!(h.sink.errors(), 1);
        assert!(h.sink.notifications[0].to_string().contains("failed to start"));
        assert!(h.session.download_enabled());
    }

    #[test]
    fn non_zero_exit_is_failure_with_code() {
        let mut h = Harness::new();
        h.start().unwrap();
        h.emit("ERROR: Unsupported URL\n");
        h.exit(1);
        h.pump();

        assert_eq!(h.session.last_outcome(), Some(&Outcome::Failure(Some(1))));
        assert_eq!(h.session.state(), SessionState::Idle);
        assert!(h.sink.notifications[0].to_string().contains("exit code 1"));
        assert!(h.sink.log.contains("Failed (Code 1)."));
    }

    #[test]
    fn progress_spanning_chunks_is_parsed_once_complete() {
        let mut h = Harness::new();
        h.start().unwrap();
        h.emit("[download]  3");
        h.pump();
        assert_eq!(h.sink.progress, 0.0);

        h.emit("3.3% of 5MiB\n");
        h.pump();
        assert_eq!(h.sink.progress, 33.3);

        // unterminated tail is still parsed at exit
        h.emit("[download]  90.0% of 5MiB");
        h.exit(2);
        h.pump();
        assert!(h.sink.progress_updates.contains(&90.0));
        assert_eq!(h.session.last_outcome(), Some(&Outcome::Failure(Some(2))));
    }

    #[test]
    fn start_persists_output_dir() {
        let mut h = Harness::new();
        h.start().unwrap();
        let expected: PathBuf = h.tmp.path().join("out");
        assert_eq!(h.session.preferences().last_download_path, Some(expected.clone()));
        assert!(expected.is_dir());
    }

    #[test]
    fn missing_tools_block_downloads() {
        let mut h = Harness::with_missing_tools(vec!["ffmpeg".into()]);
        assert_eq!(h.session.missing_tools(), ["ffmpeg".to_string()]);
        assert!(!h.session.download_enabled());
        assert!(matches!(h.start(), Err(SessionError::MissingTools(_))));
        assert!(h.script.borrow().launches.is_empty());
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[test]
    fn lost_supervisor_counts_as_abnormal_exit() {
        let mut h = Harness::new();
        h.start().unwrap();
        // Drop every sender, including the one held by the scripted process
        h.script.borrow_mut().sender = None;
        h.session.process = None;
        h.pump();
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.last_outcome(), Some(&Outcome::Cancelled));
    }
}
