use crate::utils::path_utils::sanitize_component;
use crate::utils::text::strip_control_sequences;
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

const SEPARATOR: &str = "==================================================";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminalEntryKind {
    Input,
    Output,
    Error,
}

impl TerminalEntryKind {
    pub fn label(&self) -> &'static str {
        match self {
            TerminalEntryKind::Input => "INPUT",
            TerminalEntryKind::Output => "OUTPUT",
            TerminalEntryKind::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Append-only transcript files for one session.
///
/// Layout: `<root>/<tool>/<process>/terminal_log_<stamp>.txt` plus a
/// matching `system_log_<stamp>.txt`. Every I/O failure is reported through
/// `tracing` and swallowed so a broken disk never stalls a terminal.
#[derive(Debug)]
pub struct SessionLogSink {
    dir: PathBuf,
    tool_name: String,
    process_name: String,
    terminal: Option<BufWriter<File>>,
    system: Option<BufWriter<File>>,
    terminal_path: Option<PathBuf>,
    system_path: Option<PathBuf>,
    closed: bool,
}

impl SessionLogSink {
    pub fn open(root: &Path, tool_name: &str, process_name: &str) -> Self {
        let dir = root
            .join(sanitize_component(tool_name))
            .join(sanitize_component(process_name));
        let mut sink = SessionLogSink {
            dir,
            tool_name: tool_name.to_string(),
            process_name: process_name.to_string(),
            terminal: None,
            system: None,
            terminal_path: None,
            system_path: None,
            closed: false,
        };
        if let Err(e) = sink.try_open() {
            error!(dir = %sink.dir.display(), error = %e, "Failed to open session log files");
        }
        sink
    }

    fn try_open(&mut self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating log directory {}", self.dir.display()))?;

        let now = Local::now();
        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let started = now.format("%Y-%m-%d %H:%M:%S").to_string();

        let terminal_path = self.dir.join(format!("terminal_log_{}.txt", stamp));
        let mut terminal = open_append(&terminal_path)?;
        write!(
            terminal,
            "终端日志 - {} / {}\n开始时间: {}\n{}\n",
            self.tool_name, self.process_name, started, SEPARATOR
        )?;
        terminal.flush()?;
        self.terminal = Some(terminal);
        self.terminal_path = Some(terminal_path);

        let system_path = self.dir.join(format!("system_log_{}.txt", stamp));
        let mut system = open_append(&system_path)?;
        write!(
            system,
            "系统日志 - {} / {}\n开始时间: {}\n{}\n",
            self.tool_name, self.process_name, started, SEPARATOR
        )?;
        system.flush()?;
        self.system = Some(system);
        self.system_path = Some(system_path);

        debug!(dir = %self.dir.display(), "Session log files opened");
        Ok(())
    }

    pub fn terminal_path(&self) -> Option<&Path> {
        self.terminal_path.as_deref()
    }

    pub fn system_path(&self) -> Option<&Path> {
        self.system_path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        !self.closed && (self.terminal.is_some() || self.system.is_some())
    }

    pub fn write_terminal(&mut self, text: &str, kind: TerminalEntryKind) {
        if let Err(e) = self.try_write_terminal(text, kind) {
            error!(process = %self.process_name, error = %e, "Failed to write terminal log");
        }
    }

    fn try_write_terminal(&mut self, text: &str, kind: TerminalEntryKind) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let Some(stream) = self.terminal.as_mut() else {
            return Ok(());
        };
        let clean = strip_control_sequences(text);
        if kind == TerminalEntryKind::Input && clean.trim().is_empty() {
            return Ok(());
        }
        let stamp = Local::now().format("%H:%M:%S");
        for line in clean.trim_end_matches('\n').split('\n') {
            writeln!(stream, "[{}] {}: {}", stamp, kind.label(), line)?;
        }
        stream.flush()?;
        Ok(())
    }

    pub fn write_system(&mut self, message: &str, level: LogLevel) {
        if let Err(e) = self.try_write_system(message, level) {
            error!(process = %self.process_name, error = %e, "Failed to write system log");
        }
    }

    fn try_write_system(&mut self, message: &str, level: LogLevel) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let Some(stream) = self.system.as_mut() else {
            return Ok(());
        };
        let clean = strip_control_sequences(message);
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(stream, "[{}] [{}] {}", stamp, level.label(), clean.trim_end())?;
        stream.flush()?;
        Ok(())
    }

    /// Pushes both streams through to durable storage.
    pub fn flush(&mut self) {
        for stream in [self.terminal.as_mut(), self.system.as_mut()].into_iter().flatten() {
            let synced = stream.flush().and_then(|_| stream.get_ref().sync_all());
            if let Err(e) = synced {
                error!(process = %self.process_name, error = %e, "Failed to flush session log");
            }
        }
    }

    /// Writes the footer and releases both files. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let ended = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        for stream in [self.terminal.take(), self.system.take()].into_iter().flatten() {
            if let Err(e) = finish_stream(stream, &ended) {
                error!(process = %self.process_name, error = %e, "Failed to close session log");
            }
        }
    }
}

impl Drop for SessionLogSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn finish_stream(mut stream: BufWriter<File>, ended: &str) -> Result<()> {
    writeln!(stream, "{}\n会话结束: {}", SEPARATOR, ended)?;
    stream.flush()?;
    stream.get_ref().sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(path: Option<&Path>) -> String {
        fs::read_to_string(path.expect("log path")).unwrap()
    }

    #[test]
    fn terminal_log_has_header_entries_and_footer() {
        let tmp = TempDir::new().unwrap();
        let mut sink = SessionLogSink::open(tmp.path(), "Nmap", "进程1");
        sink.write_terminal("hello\n", TerminalEntryKind::Output);
        let path = sink.terminal_path().unwrap().to_path_buf();
        sink.close();

        assert!(path.starts_with(tmp.path().join("Nmap").join("进程1")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("terminal_log_") && name.ends_with(".txt"));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "终端日志 - Nmap / 进程1");
        assert!(lines[1].starts_with("开始时间: "));
        assert_eq!(lines[2], SEPARATOR);
        assert_eq!(content.matches("OUTPUT: hello").count(), 1);
        assert!(lines.last().unwrap().starts_with("会话结束: "));
    }

    #[test]
    fn strips_escapes_and_drops_blank_input() {
        let tmp = TempDir::new().unwrap();
        let mut sink = SessionLogSink::open(tmp.path(), "tool", "p");
        sink.write_terminal("   ", TerminalEntryKind::Input);
        sink.write_terminal("\x1b[31mdenied\x1b[0m", TerminalEntryKind::Error);
        sink.write_terminal("whoami", TerminalEntryKind::Input);
        sink.flush();

        let content = read(sink.terminal_path());
        assert!(!content.contains("INPUT:    "));
        assert!(content.contains("ERROR: denied"));
        assert!(!content.contains('\x1b'));
        assert_eq!(content.matches("INPUT:").count(), 1);
    }

    #[test]
    fn system_log_lines_carry_level() {
        let tmp = TempDir::new().unwrap();
        let mut sink = SessionLogSink::open(tmp.path(), "tool", "p");
        sink.write_system("进程已启动", LogLevel::Info);
        sink.write_system("退出码 1", LogLevel::Error);
        sink.flush();

        let content = read(sink.system_path());
        let entries: Vec<&str> = content.lines().skip(3).collect();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with('[') && entries[0].ends_with("[INFO] 进程已启动"));
        assert!(entries[1].ends_with("[ERROR] 退出码 1"));
    }

    #[test]
    fn close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut sink = SessionLogSink::open(tmp.path(), "tool", "p");
        let path = sink.system_path().unwrap().to_path_buf();
        sink.close();
        sink.close();
        sink.write_system("after close", LogLevel::Info);
        drop(sink);

        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content.matches("会话结束").count(), 1);
        assert!(!content.contains("after close"));
    }

    #[test]
    fn open_failure_is_swallowed() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, b"x").unwrap();

        let mut sink = SessionLogSink::open(&blocker, "tool", "p");
        assert!(!sink.is_open());
        sink.write_terminal("ignored", TerminalEntryKind::Output);
        sink.write_system("ignored", LogLevel::Info);
        sink.close();
    }
}
