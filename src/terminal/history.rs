/// Submitted lines with shell-style Up/Down recall.
///
/// The cursor ranges over `0..=len`; `len` means "past the newest entry",
/// which recalls as an empty input line.
#[derive(Debug, Clone, Default)]
pub struct CommandHistory {
    entries: Vec<String>,
    cursor: usize,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a submitted line and parks the cursor at the end. Empty lines
    /// and immediate repeats are not stored. Returns whether it was stored.
    pub fn push(&mut self, line: &str) -> bool {
        let stored = !line.is_empty() && self.entries.last().map(String::as_str) != Some(line);
        if stored {
            self.entries.push(line.to_string());
        }
        self.cursor = self.entries.len();
        stored
    }

    /// Steps back one entry, stopping at the oldest.
    pub fn previous(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        self.cursor = self.cursor.saturating_sub(1);
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Steps forward one entry; past the newest yields an empty line.
    pub fn next(&mut self) -> &str {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
        }
        self.entries.get(self.cursor).map(String::as_str).unwrap_or("")
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
