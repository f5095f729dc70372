pub mod handle;
pub mod supervisor;

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Stable identifier for one session, unique for the supervisor's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitKind {
    Normal,
    /// Killed by a signal or otherwise ended without an exit code.
    Crashed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEventKind {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Finished { exit_code: i32, status: ExitKind },
}

/// Message from a child's I/O tasks back to the owning event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEvent {
    pub session: SessionId,
    pub kind: ProcessEventKind,
}

pub use handle::{ChildProcessHandle, HandleState, ProcessOptions};
pub use supervisor::{ProcessSupervisor, SessionSummary};
