//! Process lifecycle for the installation engine
//!
//! An installation cannot be aborted half way, so the engine must outlive the
//! front-end: closing the terminal or pressing Ctrl+C detaches the front-end
//! and leaves the engine running.
//!
//! # Solution
//! - Spawn the engine in its own process group so terminal-generated signals
//!   (SIGINT, SIGHUP) aimed at the foreground group never reach it
//! - Track running engine PIDs in a global registry
//! - On SIGINT/SIGTERM/SIGHUP, log which engines keep running and exit

use nix::sys::signal;
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::sync::{Mutex, OnceLock};

/// Global registry of running engine PIDs
static ENGINE_REGISTRY: OnceLock<Mutex<EngineRegistry>> = OnceLock::new();

/// Registry of engine processes started by this front-end
#[derive(Debug, Default)]
pub struct EngineRegistry {
    pids: BTreeSet<u32>,
}

impl EngineRegistry {
    /// Get or create the global engine registry
    pub fn global() -> &'static Mutex<EngineRegistry> {
        ENGINE_REGISTRY.get_or_init(|| Mutex::new(EngineRegistry::default()))
    }

    /// Register a freshly spawned engine
    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        log::debug!("Registered engine process PID {}", pid);
    }

    /// Unregister an engine that has been reaped
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        log::debug!("Unregistered engine process PID {}", pid);
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    /// PIDs that are still alive
    pub fn running(&self) -> Vec<u32> {
        self.pids.iter().copied().filter(|pid| is_process_alive(*pid)).collect()
    }
}

/// Record a spawned engine in the global registry
pub fn register_engine(pid: u32) {
    let mut registry = EngineRegistry::global()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    registry.register(pid);
}

/// Drop a reaped engine from the global registry
pub fn unregister_engine(pid: u32) {
    let mut registry = EngineRegistry::global()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    registry.unregister(pid);
}

/// Check if a process exists (signal 0 probe)
pub fn is_process_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Initialize signal handlers that detach the front-end from running engines.
/// Handles SIGINT (Ctrl+C), SIGTERM, and SIGHUP.
/// Call this once at program start
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            let running = EngineRegistry::global()
                .lock()
                .map(|r| r.running())
                .unwrap_or_default();

            if running.is_empty() {
                log::info!("Received {}, exiting", signal_name);
            } else {
                log::warn!(
                    "Received {}, detaching; installation engine keeps running (PID {:?})",
                    signal_name,
                    running
                );
                log::warn!("Check the engine log once it finishes");
            }

            // Exit with appropriate code (128 + signal number)
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Configure the command to run in its own process group
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid is async-signal-safe and touches no parent state
        unsafe {
            self.pre_exec(|| {
                // PGID = child PID; the engine leads its own group
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                Ok(())
            });
        }
        self
    }
}
