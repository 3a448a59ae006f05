//! Installer supervisor
//!
//! Runs the installation engine as a subprocess and publishes its output.
//!
//! # Event flow
//!
//! ```text
//! start(config) ──► write config ──► spawn engine (own process group)
//!                                         │ stdout+stderr (one pipe)
//!                                         ▼
//!              reader thread ──► Line ──┐
//!              reaper thread ──► Exited ─┴──► supervising thread ──► Output(line) ──► observers
//!                                                     │ exited, pipe drained
//!                                                     ▼
//!                                         Finished { success, exit_code }
//! ```
//!
//! The verdict does not wait for background processes that inherited the
//! output pipe: once the engine has exited, the pipe is drained for at most
//! `DRAIN_GRACE` and whatever arrives later is not forwarded.
//!
//! Each observer owns the receiving end of a channel. Dropping an `Observer`
//! detaches it; the engine and the other observers are unaffected.

use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::engine::compiler::{ConfigText, REFIND_ARCHIVE};
use crate::install_state::InstallRunState;
use crate::process_guard::{self, CommandProcessGroup};

/// Engine binary on the install media
pub const DEFAULT_ENGINE: &str = "pc-sysinstall";
/// Where the compiled configuration is written before launch
pub const DEFAULT_CONFIG_PATH: &str = "/tmp/trident-sysinstall.conf";
/// Where the engine writes its own log
pub const DEFAULT_LOG_PATH: &str = "/tmp/.pc-sysinstall/pc-sysinstall.log";
/// How long output is still collected after the engine has exited
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// `start()` called on a supervisor that already ran (or is running)
    #[error("installation already started ({state})")]
    AlreadyRunning { state: InstallRunState },

    /// Summary output has secrets replaced and must never reach the engine
    #[error("refusing to execute redacted summary configuration")]
    RedactedConfig,

    /// `wait()` called before `start()`
    #[error("installation has not been started")]
    NotStarted,

    /// Execution failure: the config could not be written or the engine could not be spawned
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Execution failure: the engine exited non-zero or was killed
    #[error("installation engine failed ({})", describe_exit(.exit_code.to_owned()))]
    EngineFailed { exit_code: Option<i32> },
}

impl SupervisorError {
    /// Launch failure or failed verdict
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::Launch { .. } | Self::EngineFailed { .. })
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

// ============================================================================
// Engine invocation
// ============================================================================

/// How to invoke the engine. The config path is appended after `args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub config_path: PathBuf,
    pub log_path: PathBuf,
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_ENGINE),
            args: vec!["-c".to_string()],
            working_dir: None,
            env: Vec::new(),
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
        }
    }
}

impl EngineCommand {
    /// Invoke `program` with no extra arguments and the default paths
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(&self.config_path)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

// ============================================================================
// Events and observers
// ============================================================================

/// Something the engine did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// One line of combined stdout/stderr, terminator stripped
    Output(String),
    /// Last event of a run; sent exactly once
    Finished {
        success: bool,
        exit_code: Option<i32>,
    },
}

impl InstallEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Receiving end of the event stream. Drop it to detach.
#[derive(Debug)]
pub struct Observer {
    rx: Receiver<InstallEvent>,
}

impl Observer {
    /// Block for the next event; `None` once the stream has ended
    pub fn recv(&self) -> Option<InstallEvent> {
        self.rx.recv().ok()
    }

    /// Next event if one is queued
    pub fn try_recv(&self) -> Option<InstallEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<InstallEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stop receiving events
    pub fn detach(self) {
        log::debug!("Observer detached");
    }
}

impl Iterator for Observer {
    type Item = InstallEvent;

    fn next(&mut self) -> Option<InstallEvent> {
        self.recv()
    }
}

// ============================================================================
// Supervisor
// ============================================================================

#[derive(Debug, Default)]
struct Shared {
    state: InstallRunState,
    exit_code: Option<i32>,
    observers: Vec<Sender<InstallEvent>>,
    finished: Option<InstallEvent>,
}

impl Shared {
    /// Deliver to every observer, forgetting the ones that detached
    fn broadcast(&mut self, event: &InstallEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

type SharedState = Arc<(Mutex<Shared>, Condvar)>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.0.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one installation. A supervisor is single-use.
#[derive(Debug)]
pub struct InstallerSupervisor {
    command: EngineCommand,
    shared: SharedState,
}

impl InstallerSupervisor {
    pub fn new(command: EngineCommand) -> Self {
        Self {
            command,
            shared: Arc::new((Mutex::new(Shared::default()), Condvar::new())),
        }
    }

    pub fn command(&self) -> &EngineCommand {
        &self.command
    }

    pub fn state(&self) -> InstallRunState {
        lock(&self.shared).state
    }

    /// Exit code of a finished run (`None` while running or after a signal)
    pub fn exit_code(&self) -> Option<i32> {
        lock(&self.shared).exit_code
    }

    /// Attach a new observer.
    ///
    /// Events produced before this call are not replayed. After the run has
    /// ended the observer receives only the `Finished` event.
    pub fn subscribe(&self) -> Observer {
        let (tx, rx) = mpsc::channel();
        let mut shared = lock(&self.shared);
        match &shared.finished {
            Some(finished) => {
                let _ = tx.send(finished.clone());
            }
            None => shared.observers.push(tx),
        }
        Observer { rx }
    }

    /// Write `config` to the engine's config path and launch the engine.
    ///
    /// # Errors
    ///
    /// - `RedactedConfig` for summary output
    /// - `AlreadyRunning` unless the supervisor has never been started
    /// - `Launch` if the config cannot be written or the engine cannot be
    ///   spawned; the run is then `Failed` and observers get `Finished`
    pub fn start(&self, config: &ConfigText) -> Result<(), SupervisorError> {
        if config.is_redacted() {
            return Err(SupervisorError::RedactedConfig);
        }

        let mut shared = lock(&self.shared);
        if shared.state != InstallRunState::NotStarted {
            return Err(SupervisorError::AlreadyRunning {
                state: shared.state,
            });
        }

        let program = self.command.program.display().to_string();
        let launched = write_config(&self.command.config_path, config.as_str())
            .and_then(|()| self.spawn_engine());

        let (child, output) = match launched {
            Ok(spawned) => spawned,
            Err(source) => {
                log::error!("Failed to launch {}: {}", program, source);
                finish(&mut shared, false, None);
                self.shared.1.notify_all();
                return Err(SupervisorError::Launch { program, source });
            }
        };

        if let Err(e) = shared.state.transition_to(InstallRunState::Running) {
            log::warn!("Ignoring run state change: {}", e);
        }
        log::info!("Installation engine started: {} (PID {})", program, child.id());
        drop(shared);

        let shared = Arc::clone(&self.shared);
        thread::spawn(move || supervise(child, output, shared));
        Ok(())
    }

    /// Spawn the engine with stdout and stderr merged into one pipe
    fn spawn_engine(&self) -> io::Result<(Child, io::PipeReader)> {
        let (reader, writer) = io::pipe()?;
        let mut cmd = self.command.to_command();
        cmd.stdout(writer.try_clone()?)
            .stderr(writer)
            .in_new_process_group();
        let child = cmd.spawn()?;
        // Our copies of the write end live in `cmd`; EOF needs them closed
        drop(cmd);
        process_guard::register_engine(child.id());
        Ok((child, reader))
    }

    /// Block until the run reaches a terminal state.
    ///
    /// # Errors
    ///
    /// - `NotStarted` if `start()` was never called
    /// - `EngineFailed` for a failed verdict (including a failed launch)
    pub fn wait(&self) -> Result<(), SupervisorError> {
        let (mutex, cvar) = &*self.shared;
        let mut shared = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.state == InstallRunState::NotStarted {
            return Err(SupervisorError::NotStarted);
        }
        while !shared.state.is_terminal() {
            shared = cvar.wait(shared).unwrap_or_else(PoisonError::into_inner);
        }
        match shared.state {
            InstallRunState::Succeeded => Ok(()),
            _ => Err(SupervisorError::EngineFailed {
                exit_code: shared.exit_code,
            }),
        }
    }

    /// The engine's log file
    pub fn install_log(&self) -> Artifact {
        self.artifact(&self.command.log_path)
    }

    /// The configuration copy the engine ran with
    pub fn install_config(&self) -> Artifact {
        self.artifact(&self.command.config_path)
    }

    fn artifact(&self, path: &Path) -> Artifact {
        let artifact = read_artifact(path);
        if self.state() == InstallRunState::Running {
            if let Artifact::Available(content) = artifact {
                return Artifact::Partial {
                    content,
                    reason: "installation still running".to_string(),
                };
            }
        }
        artifact
    }
}

fn write_config(path: &Path, text: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    log::debug!("Wrote engine configuration to {}", path.display());
    Ok(())
}

/// Record the verdict and send the single `Finished` event
fn finish(shared: &mut Shared, success: bool, exit_code: Option<i32>) {
    if let Err(e) = shared.state.transition_to(InstallRunState::from_success(success)) {
        log::warn!("Ignoring run state change: {}", e);
        return;
    }
    shared.exit_code = exit_code;
    let event = InstallEvent::Finished { success, exit_code };
    shared.broadcast(&event);
    shared.finished = Some(event);
    // Closing every channel ends the observers' iterators
    shared.observers.clear();
}

/// Messages to the supervising thread
enum Pump {
    Line(String),
    Eof,
    Exited(io::Result<ExitStatus>),
}

/// Reader thread: one `Line` per output line, then `Eof`
fn read_output(output: io::PipeReader, tx: Sender<Pump>) {
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(strip_line_ending(&buf)).into_owned();
                if tx.send(Pump::Line(line)).is_err() {
                    // Run already finished
                    return;
                }
            }
            Err(e) => {
                log::warn!("Error reading engine output: {}", e);
                break;
            }
        }
    }
    let _ = tx.send(Pump::Eof);
}

/// Supervising thread: forward output in order, reap the engine, then
/// publish the verdict once the pipe is drained
fn supervise(mut child: Child, output: io::PipeReader, shared: SharedState) {
    let pid = child.id();
    let (tx, rx) = mpsc::channel();

    let reader_tx = tx.clone();
    thread::spawn(move || read_output(output, reader_tx));
    thread::spawn(move || {
        let _ = tx.send(Pump::Exited(child.wait()));
    });

    let mut status = None;
    let mut deadline: Option<Instant> = None;
    let mut eof = false;
    while status.is_none() || !eof {
        let message = match deadline {
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        };
        match message {
            Ok(Pump::Line(line)) => lock(&shared).broadcast(&InstallEvent::Output(line)),
            Ok(Pump::Eof) => eof = true,
            Ok(Pump::Exited(result)) => {
                status = Some(result);
                deadline = Some(Instant::now() + DRAIN_GRACE);
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Engine exited but its output is still held open by another process");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let (success, exit_code) = match status {
        Some(Ok(status)) => (status.success(), status.code()),
        Some(Err(e)) => {
            log::error!("Failed to wait for installation engine: {}", e);
            (false, None)
        }
        None => (false, None),
    };
    process_guard::unregister_engine(pid);

    if success {
        log::info!("Installation engine finished successfully");
    } else {
        log::error!("Installation engine failed ({})", describe_exit(exit_code));
    }

    let (mutex, cvar) = &*shared;
    let mut guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
    finish(&mut guard, success, exit_code);
    cvar.notify_all();
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

// ============================================================================
// Artifacts
// ============================================================================

/// Result of reading a post-run file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Available(String),
    /// Readable but incomplete or not valid UTF-8
    Partial { content: String, reason: String },
    Unavailable(String),
}

impl Artifact {
    /// Whatever content could be read
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Available(content) | Self::Partial { content, .. } => Some(content),
            Self::Unavailable(_) => None,
        }
    }
}

fn read_artifact(path: &Path) -> Artifact {
    match fs::read(path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(content) => Artifact::Available(content),
            Err(e) => Artifact::Partial {
                content: String::from_utf8_lossy(e.as_bytes()).into_owned(),
                reason: "contains invalid UTF-8".to_string(),
            },
        },
        Err(e) => Artifact::Unavailable(format!("{}: {}", path.display(), e)),
    }
}

/// Whether the rEFInd archive is present on the install media
pub fn refind_archive_available() -> bool {
    Path::new(REFIND_ARCHIVE).is_file()
}
