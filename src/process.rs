//! External process supervision.
//!
//! A [`Launcher`] starts one child process and reports everything it does as
//! [`ProcessEvent`]s on an unbounded channel. The control loop drains that
//! channel without blocking. Two launchers exist:
//!
//! - [`AsyncLauncher`]: tokio child process, output read by async tasks on the
//!   shared runtime. No thread is dedicated to the download.
//! - [`ThreadLauncher`]: std child process, output read by dedicated OS
//!   threads, exit observed by a supervisor thread.
//!
//! Both guarantee that [`ProcessEvent::Exited`] is the last event and arrives
//! after every output chunk of both streams. Output a leftover helper process
//! still writes after [`READER_DRAIN_TIMEOUT`] is dropped.
//!
//! On Unix the child leads its own process group, and cancel kills the whole
//! group so muxer helpers die with the downloader.

use crate::error::LaunchError;
use std::{
    ffi::OsString,
    fmt,
    io::{BufRead, BufReader, Read},
    process::{ExitStatus, Stdio},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead},
    runtime::Handle,
    sync::{
        mpsc::{UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// How often the worker supervisor checks for exit or a kill request
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output readers may keep going once the child has exited
pub const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Exit classification of a finished process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The process returned an exit code on its own
    Normal,
    /// Forcibly terminated, either by `cancel` or by a signal
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub code: Option<i32>,
    pub kind: ExitKind,
}

impl Completion {
    fn from_status(status: ExitStatus, killed: bool) -> Self {
        let code = status.code();
        // No code means a signal ended it. A clean 0 won the race with a kill.
        let kind = if code.is_none() || (killed && code != Some(0)) {
            ExitKind::Killed
        } else {
            ExitKind::Normal
        };
        Self { code, kind }
    }

    fn abnormal() -> Self {
        Self {
            code: None,
            kind: ExitKind::Killed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == ExitKind::Normal && self.code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Raw text, usually one newline-terminated line
    Output { stream: OutputStream, text: String },
    /// Always the final event of a process
    Exited(Completion),
}

pub type EventSender = UnboundedSender<ProcessEvent>;
pub type EventReceiver = UnboundedReceiver<ProcessEvent>;

/// Control surface of one running child.
pub trait ProcessControl: Send {
    fn pid(&self) -> Option<u32>;

    /// Forcibly terminates the process. Safe to call more than once.
    fn cancel(&mut self);
}

/// Starts external processes.
pub trait Launcher {
    fn launch(
        &self,
        program: &str,
        args: &[OsString],
        events: EventSender,
    ) -> Result<Box<dyn ProcessControl>, LaunchError>;
}

/// Scheduling strategy for supervising the downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Async tasks on the shared tokio runtime
    #[default]
    EventDriven,
    /// Dedicated OS threads with blocking reads
    Worker,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "async" | "event" | "event-driven" => Ok(Self::EventDriven),
            "thread" | "worker" => Ok(Self::Worker),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventDriven => f.write_str("async"),
            Self::Worker => f.write_str("thread"),
        }
    }
}

/// Builds the launcher for a strategy. The event-driven one needs a runtime.
pub fn launcher_for(strategy: Strategy, runtime: Handle) -> Box<dyn Launcher> {
    match strategy {
        Strategy::EventDriven => Box::new(AsyncLauncher::new(runtime)),
        Strategy::Worker => Box::new(ThreadLauncher),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Completed(Option<i32>),
    Killed,
}

/// The one live process of a session.
///
/// Terminal states are final; a new download needs a new handle.
pub struct ProcessHandle {
    control: Box<dyn ProcessControl>,
    state: ProcessState,
}

impl ProcessHandle {
    pub fn start(
        launcher: &dyn Launcher,
        program: &str,
        args: &[OsString],
        events: EventSender,
    ) -> Result<Self, LaunchError> {
        let control = launcher.launch(program, args, events)?;
        Ok(Self {
            control,
            state: ProcessState::Running,
        })
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.control.pid()
    }

    /// No-op unless the process is still running.
    pub fn cancel(&mut self) {
        if self.state == ProcessState::Running {
            self.control.cancel();
        }
    }

    pub fn finish(&mut self, completion: &Completion) {
        if self.state != ProcessState::Running {
            return;
        }
        self.state = match completion.kind {
            ExitKind::Normal => ProcessState::Completed(completion.code),
            ExitKind::Killed => ProcessState::Killed,
        };
    }
}

// ---------------------------------------------------------------------------
// Event-driven strategy
// ---------------------------------------------------------------------------

pub struct AsyncLauncher {
    runtime: Handle,
}

impl AsyncLauncher {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }
}

struct AsyncProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessControl for AsyncProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn cancel(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            debug!(pid = ?self.pid, "kill requested");
            let _ = tx.send(());
        }
    }
}

impl Launcher for AsyncLauncher {
    fn launch(
        &self,
        program: &str,
        args: &[OsString],
        events: EventSender,
    ) -> Result<Box<dyn ProcessControl>, LaunchError> {
        // Child reaping is registered with the runtime on spawn
        let _guard = self.runtime.enter();

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|e| LaunchError::from_spawn(program, e))?;

        let pid = child.id();
        info!(program, ?pid, strategy = "async", "process started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(self.runtime.spawn(read_stream_async(
                stdout,
                OutputStream::Stdout,
                events.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(self.runtime.spawn(read_stream_async(
                stderr,
                OutputStream::Stderr,
                events.clone(),
            )));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        self.runtime
            .spawn(supervise_async(child, readers, kill_rx, events));

        Ok(Box::new(AsyncProcess {
            pid,
            kill_tx: Some(kill_tx),
        }))
    }
}

async fn read_stream_async<R>(reader: R, stream: OutputStream, events: EventSender)
where
    R: AsyncRead + Unpin,
{
    let mut reader = tokio::io::BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf).into_owned();
                if events.send(ProcessEvent::Output { stream, text }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(?stream, "read failed: {}", e);
                break;
            }
        }
    }
    debug!(?stream, "reader task exiting");
}

#[cfg(unix)]
fn kill_async(child: &mut tokio::process::Child) -> bool {
    match child.id() {
        Some(pid) if kill_group(pid) => true,
        _ => child.start_kill().is_ok(),
    }
}

#[cfg(not(unix))]
fn kill_async(child: &mut tokio::process::Child) -> bool {
    child.start_kill().is_ok()
}

/// SIGKILL to the group the child leads
#[cfg(unix)]
fn kill_group(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, "killpg failed: {}", e);
            false
        }
    }
}

async fn supervise_async(
    mut child: tokio::process::Child,
    readers: Vec<JoinHandle<()>>,
    kill_rx: oneshot::Receiver<()>,
    events: EventSender,
) {
    let mut killed = false;
    // A dropped handle counts as a kill request too
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => match child.try_wait() {
            Ok(Some(status)) => Ok(status),
            _ => {
                killed = kill_async(&mut child);
                child.wait().await
            }
        },
    };

    let deadline = tokio::time::Instant::now() + READER_DRAIN_TIMEOUT;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            warn!("output pipe still open after exit, dropping the rest");
            reader.abort();
        }
    }

    let completion = match status {
        Ok(status) => Completion::from_status(status, killed),
        Err(e) => {
            warn!("waiting for child failed: {}", e);
            Completion::abnormal()
        }
    };
    info!(code = ?completion.code, kind = ?completion.kind, "process exited");
    let _ = events.send(ProcessEvent::Exited(completion));
}

// ---------------------------------------------------------------------------
// Dedicated worker strategy
// ---------------------------------------------------------------------------

pub struct ThreadLauncher;

struct WorkerProcess {
    pid: u32,
    kill_requested: Arc<AtomicBool>,
}

impl ProcessControl for WorkerProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn cancel(&mut self) {
        if !self.kill_requested.swap(true, Ordering::AcqRel) {
            debug!(pid = self.pid, "kill requested");
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        self.kill_requested.store(true, Ordering::Release);
    }
}

impl Launcher for ThreadLauncher {
    fn launch(
        &self,
        program: &str,
        args: &[OsString],
        events: EventSender,
    ) -> Result<Box<dyn ProcessControl>, LaunchError> {
        let mut command = std::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command
            .spawn()
            .map_err(|e| LaunchError::from_spawn(program, e))?;

        let pid = child.id();
        info!(program, pid, strategy = "thread", "process started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let tx = events.clone();
            readers.push(thread::spawn(move || {
                read_stream_blocking(stdout, OutputStream::Stdout, tx)
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = events.clone();
            readers.push(thread::spawn(move || {
                read_stream_blocking(stderr, OutputStream::Stderr, tx)
            }));
        }

        let kill_requested = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&kill_requested);
        thread::spawn(move || supervise_blocking(child, readers, flag, events));

        Ok(Box::new(WorkerProcess {
            pid,
            kill_requested,
        }))
    }
}

fn read_stream_blocking<R: Read>(reader: R, stream: OutputStream, events: EventSender) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf).into_owned();
                if events.send(ProcessEvent::Output { stream, text }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(?stream, "read failed: {}", e);
                break;
            }
        }
    }
    debug!(?stream, "reader thread exiting");
}

#[cfg(unix)]
fn kill_blocking(child: &mut std::process::Child) -> bool {
    kill_group(child.id()) || child.kill().is_ok()
}

#[cfg(not(unix))]
fn kill_blocking(child: &mut std::process::Child) -> bool {
    child.kill().is_ok()
}

fn supervise_blocking(
    mut child: std::process::Child,
    readers: Vec<thread::JoinHandle<()>>,
    kill_requested: Arc<AtomicBool>,
    events: EventSender,
) {
    let mut killed = false;
    let mut kill_sent = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {}
            Err(e) => break Err(e),
        }
        if !kill_sent && kill_requested.load(Ordering::Acquire) {
            // Killing the group closes the pipes, which unblocks the readers
            kill_sent = true;
            killed = kill_blocking(&mut child);
            continue;
        }
        thread::sleep(WORKER_POLL_INTERVAL);
    };

    // A blocked std read cannot be interrupted, so late readers are detached
    let deadline = Instant::now() + READER_DRAIN_TIMEOUT;
    for reader in readers {
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(WORKER_POLL_INTERVAL);
        }
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            warn!("output pipe still open after exit, dropping the rest");
        }
    }

    let completion = match status {
        Ok(status) => Completion::from_status(status, killed),
        Err(e) => {
            warn!("waiting for child failed: {}", e);
            Completion::abnormal()
        }
    };
    info!(code = ?completion.code, kind = ?completion.kind, "process exited");
    let _ = events.send(ProcessEvent::Exited(completion));
}
