pub mod history;
pub mod keys;
pub mod session;

pub use history::CommandHistory;
pub use keys::{Key, KeyOutcome};
pub use session::{SessionState, SpanStyle, StyledSpan, TerminalSession, SPAWN_FAILURE_EXIT_CODE};
