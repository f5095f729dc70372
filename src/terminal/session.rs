use super::history::CommandHistory;
use super::keys::{Key, KeyOutcome};
use crate::error::AppError;
use crate::process::{ChildProcessHandle, ExitKind, ProcessEventKind, SessionId, SessionSummary};
use crate::utils::session_log::{LogLevel, SessionLogSink, TerminalEntryKind};
use crate::utils::text::{normalize_newlines, Utf8Decoder};
use serde::Serialize;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Exit code recorded when the process could not be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Log-only session without a child process.
    NoProcess,
    Running,
    Finished,
    /// Ended by the user.
    Stopped,
}

impl SessionState {
    pub fn is_settled(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpanStyle {
    Output,
    Error,
    /// A submitted line that was sent to the process.
    Input,
    Info,
    Success,
    Warning,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    pub range: Range<usize>,
    pub style: SpanStyle,
}

fn annotation_tag(level: LogLevel) -> (&'static str, SpanStyle) {
    match level {
        LogLevel::Info => ("[信息]", SpanStyle::Info),
        LogLevel::Success => ("[成功]", SpanStyle::Success),
        LogLevel::Warning => ("[警告]", SpanStyle::Warning),
        LogLevel::Error => ("[错误]", SpanStyle::Failure),
    }
}

/// One tab: scrollback, editable input line, history and an optional child.
///
/// The buffer always ends with `prompt + live input`. Everything before
/// `input_start` is history and is never edited by keystrokes; process
/// output is spliced in above the live line so a half-typed command is
/// carried over intact.
#[derive(Debug)]
pub struct TerminalSession {
    id: SessionId,
    name: String,
    prompt: String,
    buffer: String,
    spans: Vec<StyledSpan>,
    input_start: usize,
    caret: usize,
    anchor: Option<usize>,
    history: CommandHistory,
    state: SessionState,
    exit_code: Option<i32>,
    process: Option<ChildProcessHandle>,
    log: Option<SessionLogSink>,
    stdout_decoder: Utf8Decoder,
    stderr_decoder: Utf8Decoder,
}

impl TerminalSession {
    pub fn new(id: SessionId, name: &str, prompt: &str) -> Self {
        let mut session = Self {
            id,
            name: name.to_string(),
            prompt: prompt.to_string(),
            buffer: String::new(),
            spans: Vec::new(),
            input_start: 0,
            caret: 0,
            anchor: None,
            history: CommandHistory::new(),
            state: SessionState::NoProcess,
            exit_code: None,
            process: None,
            log: None,
            stdout_decoder: Utf8Decoder::new(),
            stderr_decoder: Utf8Decoder::new(),
        };
        session.render_prompt("");
        session
    }

    pub fn with_log(mut self, sink: SessionLogSink) -> Self {
        self.log = Some(sink);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Scrollback without the live prompt line.
    pub fn history_text(&self) -> &str {
        &self.buffer[..self.live_line_start()]
    }

    pub fn input(&self) -> &str {
        &self.buffer[self.input_start..]
    }

    pub fn input_start(&self) -> usize {
        self.input_start
    }

    pub fn caret(&self) -> usize {
        self.caret
    }

    pub fn selection(&self) -> Option<Range<usize>> {
        let anchor = self.anchor?;
        let (start, end) = (anchor.min(self.caret), anchor.max(self.caret));
        (start < end).then_some(start..end)
    }

    pub fn spans(&self) -> &[StyledSpan] {
        &self.spans
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ChildProcessHandle::pid)
    }

    pub fn log_sink(&self) -> Option<&SessionLogSink> {
        self.log.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn status(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            exit_code: self.exit_code,
            pid: self.pid(),
        }
    }

    // ---- process lifecycle ----

    /// Starts `handle` with `argv`. A spawn failure is annotated in the
    /// buffer, settles the session as `Finished` and is returned for
    /// narration; it never leaves the session half-started.
    pub fn start(&mut self, mut handle: ChildProcessHandle, argv: &[String]) -> Result<(), AppError> {
        if self.state != SessionState::NoProcess {
            return Err(AppError::SpawnError {
                program: argv.first().cloned().unwrap_or_default(),
                reason: format!("session {} already ran a process", self.name),
            });
        }

        self.log_line(&format!("执行命令: {}", argv.join(" ")), LogLevel::Info);
        match handle.start(argv) {
            Ok(()) => {
                self.process = Some(handle);
                self.state = SessionState::Running;
                info!(session = %self.id, name = %self.name, pid = ?self.pid(), "Session running");
                Ok(())
            }
            Err(e) => {
                self.log_line(&format!("启动失败: {}", e), LogLevel::Error);
                self.state = SessionState::Finished;
                self.exit_code = Some(SPAWN_FAILURE_EXIT_CODE);
                Err(e)
            }
        }
    }

    /// Applies one event from the child. Returns the exit code when the
    /// event completed the run. Settled sessions ignore everything.
    pub fn on_process_event(&mut self, kind: ProcessEventKind) -> Option<i32> {
        if self.state != SessionState::Running {
            if let (ProcessEventKind::Finished { exit_code, .. }, Some(process)) = (&kind, self.process.as_mut()) {
                process.mark_finished(*exit_code);
            }
            debug!(session = %self.id, state = ?self.state, "Ignoring event for settled session");
            return None;
        }

        match kind {
            ProcessEventKind::Stdout(bytes) => {
                let text = self.stdout_decoder.decode(&bytes);
                self.append_output(&text, TerminalEntryKind::Output);
                None
            }
            ProcessEventKind::Stderr(bytes) => {
                let text = self.stderr_decoder.decode(&bytes);
                self.append_output(&text, TerminalEntryKind::Error);
                None
            }
            ProcessEventKind::Finished { exit_code, status } => {
                let tail = self.stdout_decoder.finish();
                self.append_output(&tail, TerminalEntryKind::Output);
                let tail = self.stderr_decoder.finish();
                self.append_output(&tail, TerminalEntryKind::Error);
                self.finish(exit_code, status);
                Some(exit_code)
            }
        }
    }

    fn finish(&mut self, exit_code: i32, status: ExitKind) {
        if let Some(process) = self.process.as_mut() {
            process.mark_finished(exit_code);
        }
        self.state = SessionState::Finished;
        self.exit_code = Some(exit_code);

        if exit_code == 0 {
            self.log_line("进程执行完成 (退出码 0)", LogLevel::Success);
        } else if status == ExitKind::Crashed {
            self.log_line(&format!("进程被终止 (退出码 {})", exit_code), LogLevel::Error);
        } else {
            self.log_line(&format!("进程异常退出 (退出码 {})", exit_code), LogLevel::Error);
        }
        if let Some(log) = self.log.as_mut() {
            log.flush();
        }
    }

    /// User-initiated stop. Returns false when nothing was running.
    pub fn stop(&mut self, graceful: bool) -> bool {
        if self.state != SessionState::Running {
            return false;
        }
        if let Some(process) = self.process.as_ref() {
            process.terminate(graceful);
        }
        self.state = SessionState::Stopped;
        self.log_line("进程已被用户终止", LogLevel::Warning);
        true
    }

    /// Stops anything still running and seals the log files.
    pub fn close(&mut self) {
        if let Some(process) = self.process.as_ref() {
            process.terminate(false);
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Stopped;
            self.log_line("会话关闭，进程已终止", LogLevel::Warning);
        }
        if let Some(log) = self.log.as_mut() {
            log.close();
        }
    }

    fn append_output(&mut self, text: &str, kind: TerminalEntryKind) {
        let text = normalize_newlines(text);
        if text.is_empty() {
            return;
        }
        if let Some(log) = self.log.as_mut() {
            log.write_terminal(&text, kind);
        }
        let style = match kind {
            TerminalEntryKind::Error => SpanStyle::Error,
            _ => SpanStyle::Output,
        };
        self.append_system(&text, style);
    }

    /// Adds an annotation line and mirrors it to the system log stream.
    pub fn log_line(&mut self, message: &str, level: LogLevel) {
        let (tag, style) = annotation_tag(level);
        self.append_system(&format!("{} {}", tag, message), style);
        if let Some(log) = self.log.as_mut() {
            log.write_system(message, level);
        }
    }

    // ---- buffer mutation ----

    /// Start of the prompt that precedes the live input, if it is rendered.
    fn prompt_start(&self) -> Option<usize> {
        let start = self.input_start.checked_sub(self.prompt.len())?;
        (self.buffer.get(start..self.input_start) == Some(self.prompt.as_str())).then_some(start)
    }

    fn live_line_start(&self) -> usize {
        self.prompt_start().unwrap_or(self.input_start)
    }

    /// Splices system text above the live input line, keeping what the user
    /// has typed and where their caret was.
    pub fn append_system(&mut self, text: &str, style: SpanStyle) {
        let cut = self.live_line_start();
        let old_input_start = self.input_start;
        let live_input = self.buffer[self.input_start..].to_string();
        let caret = self.caret;
        let anchor = self.anchor;

        self.buffer.truncate(cut);
        self.push_block(text, style);
        self.render_prompt(&live_input);

        let new_input_start = self.input_start;
        let relocate = |pos: usize| {
            if pos < cut {
                pos
            } else {
                new_input_start + pos.saturating_sub(old_input_start)
            }
        };
        self.caret = relocate(caret);
        self.anchor = anchor.map(relocate);
    }

    fn push_block(&mut self, text: &str, style: SpanStyle) {
        if !self.buffer.is_empty() && !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }
        let start = self.buffer.len();
        self.buffer.push_str(text);
        if !text.ends_with('\n') {
            self.buffer.push('\n');
        }
        self.spans.push(StyledSpan {
            range: start..self.buffer.len(),
            style,
        });
    }

    fn render_prompt(&mut self, input: &str) {
        self.buffer.push_str(&self.prompt);
        self.input_start = self.buffer.len();
        self.buffer.push_str(input);
        self.caret = self.buffer.len();
        self.anchor = None;
    }

    fn replace_input(&mut self, text: &str) {
        self.buffer.truncate(self.input_start);
        self.buffer.push_str(text);
        self.caret = self.buffer.len();
        self.anchor = None;
    }

    /// Removes the editable part of the selection and moves the caret into
    /// the editable region. Returns whether anything was removed.
    fn prepare_edit(&mut self) -> bool {
        let removed = match self.selection() {
            Some(range) if range.end > self.input_start => {
                let start = range.start.max(self.input_start);
                self.buffer.replace_range(start..range.end, "");
                self.caret = start;
                true
            }
            _ => false,
        };
        self.anchor = None;
        self.caret = self.caret.clamp(self.input_start, self.buffer.len());
        removed
    }

    pub fn insert_text(&mut self, text: &str) {
        let clean: String = text.chars().filter(|c| !matches!(c, '\n' | '\r')).collect();
        self.prepare_edit();
        if clean.is_empty() {
            return;
        }
        self.buffer.insert_str(self.caret, &clean);
        self.caret += clean.len();
    }

    fn backspace(&mut self) {
        if self.prepare_edit() || self.caret <= self.input_start {
            return;
        }
        let prev = prev_boundary(&self.buffer, self.caret);
        self.buffer.replace_range(prev..self.caret, "");
        self.caret = prev;
    }

    fn delete_forward(&mut self) {
        if self.prepare_edit() || self.caret >= self.buffer.len() {
            return;
        }
        let next = next_boundary(&self.buffer, self.caret);
        self.buffer.replace_range(self.caret..next, "");
    }

    /// Places the caret (e.g. from a mouse click), snapping to a character.
    pub fn set_caret(&mut self, pos: usize) {
        self.caret = floor_boundary(&self.buffer, pos);
        self.anchor = None;
    }

    pub fn select(&mut self, anchor: usize, caret: usize) {
        self.anchor = Some(floor_boundary(&self.buffer, anchor));
        self.caret = floor_boundary(&self.buffer, caret);
    }

    /// Enter: records history, sends the line to the child and opens a
    /// fresh prompt.
    pub fn submit(&mut self) {
        let user_input = self.buffer[self.input_start..].to_string();
        let line_start = self.live_line_start();
        self.history.push(&user_input);

        self.buffer.push('\n');
        self.input_start = self.buffer.len();
        self.caret = self.buffer.len();
        self.anchor = None;

        if let Some(log) = self.log.as_mut() {
            log.write_terminal(&user_input, TerminalEntryKind::Input);
        }

        let sent = match (self.state, self.process.as_ref()) {
            (SessionState::Running, Some(process)) => Some(process.write(format!("{}\n", user_input).as_bytes())),
            (_, Some(_)) if !user_input.is_empty() => {
                Some(Err(AppError::StdinWriteError("process has finished".to_string())))
            }
            _ => None,
        };

        let annotated = match sent {
            Some(Ok(())) => {
                self.spans.push(StyledSpan {
                    range: line_start..self.input_start,
                    style: SpanStyle::Input,
                });
                false
            }
            Some(Err(e)) => {
                warn!(session = %self.id, error = %e, "Dropped submitted line");
                self.log_line(&format!("输入发送失败: {}", e), LogLevel::Error);
                true
            }
            None if !user_input.is_empty() => {
                self.log_line("没有运行中的进程，输入未发送", LogLevel::Error);
                true
            }
            None => false,
        };

        if !annotated {
            self.render_prompt("");
        }
    }

    fn paste(&mut self, text: &str) {
        let text = normalize_newlines(text);
        let mut lines = text.split('\n');
        self.insert_text(lines.next().unwrap_or(""));

        let rest: Vec<&str> = lines.collect();
        let Some((last, middle)) = rest.split_last() else {
            return;
        };
        self.submit();
        for line in middle.iter().filter(|l| !l.trim().is_empty()) {
            self.insert_text(line);
            self.submit();
        }
        // The final line waits for Enter like typed input.
        self.insert_text(last);
    }

    fn clear_screen(&mut self) {
        let live_input = self.buffer[self.input_start..].to_string();
        let caret_offset = self.caret.checked_sub(self.input_start).unwrap_or(live_input.len());
        self.buffer.clear();
        self.spans.clear();
        self.render_prompt(&live_input);
        self.caret = self.input_start + caret_offset;
    }

    fn interrupt(&mut self) -> bool {
        let delivered = match (self.state, self.process.as_ref()) {
            (SessionState::Running, Some(process)) => process.interrupt(),
            _ => return false,
        };
        if delivered {
            self.log_line("已发送中断信号", LogLevel::Warning);
        } else {
            self.log_line("中断信号发送失败", LogLevel::Error);
        }
        true
    }

    pub fn handle_key(&mut self, key: Key) -> KeyOutcome {
        match key {
            Key::Char(c) if c.is_control() && c != '\t' => return KeyOutcome::Ignored,
            Key::Char(c) => self.insert_text(c.encode_utf8(&mut [0u8; 4])),
            Key::Enter => self.submit(),
            Key::Backspace => self.backspace(),
            Key::Delete => self.delete_forward(),
            Key::Left => self.set_caret(prev_boundary(&self.buffer, self.caret)),
            Key::Right => self.set_caret(next_boundary(&self.buffer, self.caret)),
            Key::Home => self.set_caret(self.input_start),
            Key::End => self.set_caret(self.buffer.len()),
            Key::Up => match self.history.previous().map(str::to_string) {
                Some(entry) => self.replace_input(&entry),
                None => return KeyOutcome::Ignored,
            },
            Key::Down => {
                let entry = self.history.next().to_string();
                self.replace_input(&entry);
            }
            Key::Copy => {
                return match self.selection() {
                    Some(range) => KeyOutcome::Copied(self.buffer[range].to_string()),
                    None => KeyOutcome::Ignored,
                }
            }
            Key::Paste(text) => self.paste(&text),
            Key::SelectAll => self.select(0, self.buffer.len()),
            Key::Clear => self.clear_screen(),
            Key::Interrupt => {
                if !self.interrupt() {
                    return KeyOutcome::Ignored;
                }
            }
        }
        KeyOutcome::Handled
    }
}

fn floor_boundary(s: &str, pos: usize) -> usize {
    let mut pos = pos.min(s.len());
    while !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn prev_boundary(s: &str, pos: usize) -> usize {
    s[..pos].char_indices().next_back().map(|(i, _)| i).unwrap_or(0)
}

fn next_boundary(s: &str, pos: usize) -> usize {
    s[pos..].chars().next().map(|c| pos + c.len_utf8()).unwrap_or(pos)
}
