/// Input delivered to a terminal session by the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Delete,
    Left,
    Right,
    Home,
    End,
    Up,
    Down,
    // Intercepted shortcuts
    Copy,
    Paste(String),
    SelectAll,
    Clear,
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Handled,
    /// Selected text for the clipboard.
    Copied(String),
    Ignored,
}
