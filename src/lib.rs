//! Core of a desktop toolbox for security command-line tools: builds tool
//! command lines, runs them as child processes and presents each run as an
//! interactive terminal session with on-disk transcripts.

pub mod config;
pub mod error;
pub mod process;
pub mod terminal;
pub mod tools;
pub mod utils;

pub use config::Config;
pub use error::AppError;
pub use process::{ProcessSupervisor, SessionId, SessionSummary};
pub use terminal::{Key, KeyOutcome, TerminalSession};
