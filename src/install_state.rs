//! Install Run State Machine
//!
//! Source of truth for where an engine run stands. The supervisor owns one
//! `InstallRunState` and only changes it through `transition_to()`, so a run
//! can never leave a terminal state or skip `Running`.
//!
//! # Design Principles
//!
//! - **One-directional**: Transitions only move forward
//! - **Terminal is final**: `Succeeded` and `Failed` accept no transition
//! - **Fail Fast**: Invalid transitions return errors immediately
//!
//! # State Flow
//!
//! ```text
//! NotStarted
//!     ↓            (launch failure)
//! Running  ─────────────────────┐
//!     ↓                         ↓
//! Succeeded                   Failed
//! ```

use std::fmt;
use thiserror::Error;

/// Lifecycle of one installation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum InstallRunState {
    /// `start()` has not been called yet
    #[default]
    NotStarted = 0,

    /// The engine process is alive (or its output is still being drained)
    Running = 1,

    /// Engine exited with status 0 (terminal state)
    Succeeded = 2,

    /// Engine exited non-zero, was killed by a signal, or never launched
    /// (terminal state)
    Failed = 3,
}

impl InstallRunState {
    /// Returns true if this is a terminal state (Succeeded or Failed)
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns a human-readable description of this state
    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::Running => "Installation running",
            Self::Succeeded => "Installation complete",
            Self::Failed => "Installation failed",
        }
    }

    /// Whether `self → to` is an allowed edge
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::NotStarted, Self::Running)
                | (Self::NotStarted, Self::Failed)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }

    /// Move to `to`, or explain why the edge is not allowed.
    ///
    /// # Errors
    ///
    /// - `AlreadyInState` if `to` is the current state
    /// - `FromTerminalState` if the run already finished
    /// - `InvalidTransition` for any other disallowed edge
    pub fn transition_to(&mut self, to: Self) -> Result<Self, RunTransitionError> {
        if *self == to {
            return Err(RunTransitionError::AlreadyInState { state: to });
        }
        if self.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: *self });
        }
        if !self.can_transition_to(to) {
            return Err(RunTransitionError::InvalidTransition { from: *self, to });
        }

        log::debug!("Run state: {} -> {}", self, to);
        *self = to;
        Ok(to)
    }

    /// Terminal state for an exit verdict
    #[inline]
    pub const fn from_success(success: bool) -> Self {
        if success { Self::Succeeded } else { Self::Failed }
    }
}

impl fmt::Display for InstallRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during run state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    /// Attempted to transition from a terminal state
    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: InstallRunState },

    /// Attempted an edge the state machine does not have
    #[error("Cannot go from {from} to {to}")]
    InvalidTransition {
        from: InstallRunState,
        to: InstallRunState,
    },

    /// Attempted to transition to the same state
    #[error("Already in state {state}")]
    AlreadyInState { state: InstallRunState },
}
