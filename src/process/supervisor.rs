use super::{ChildProcessHandle, ProcessEvent, ProcessOptions, SessionId};
use crate::config::Config;
use crate::error::AppError;
use crate::terminal::{Key, KeyOutcome, SessionState, TerminalSession};
use crate::tools::command_builder::CommandBuilder;
use crate::tools::parameter::{serialize_parameters, validate_parameters, Parameter};
use crate::utils::path_utils::absolutize;
use crate::utils::session_log::{LogLevel, SessionLogSink};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

pub const SYSTEM_SESSION_NAME: &str = "系统日志";
const SYSTEM_TOOL_NAME: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
    pub state: SessionState,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
}

/// Owns every terminal session and routes child events to them by id.
///
/// Children report through one channel; the owner of the supervisor pulls
/// events with [`next_event`](Self::next_event) and applies them with
/// [`handle_event`](Self::handle_event), so all session state is mutated
/// from a single task.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: Arc<Config>,
    builder: CommandBuilder,
    system: TerminalSession,
    sessions: IndexMap<SessionId, TerminalSession>,
    next_index: u64,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events_rx: mpsc::UnboundedReceiver<ProcessEvent>,
}

impl ProcessSupervisor {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_builder(config, CommandBuilder::new())
    }

    pub fn with_builder(config: Arc<Config>, builder: CommandBuilder) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut system = TerminalSession::new(SessionId::new(), SYSTEM_SESSION_NAME, &config.prompt);
        if let Some(sink) = open_sink(&config, SYSTEM_TOOL_NAME, SYSTEM_SESSION_NAME) {
            system = system.with_log(sink);
        }
        Self {
            config,
            builder,
            system,
            sessions: IndexMap::new(),
            next_index: 1,
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Direct entry into the system log session.
    pub fn system_log(&mut self, message: &str, level: LogLevel) {
        self.system.log_line(message, level);
    }

    pub fn system_session(&self) -> &TerminalSession {
        &self.system
    }

    pub fn session(&self, id: SessionId) -> Option<&TerminalSession> {
        if id == self.system.id() {
            return Some(&self.system);
        }
        self.sessions.get(&id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut TerminalSession> {
        if id == self.system.id() {
            return Some(&mut self.system);
        }
        self.sessions.get_mut(&id)
    }

    /// System session first, then tool sessions in creation order.
    pub fn sessions(&self) -> impl Iterator<Item = &TerminalSession> {
        std::iter::once(&self.system).chain(self.sessions.values())
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions().map(TerminalSession::status).collect()
    }

    fn next_name(&mut self) -> String {
        let name = format!("进程{}", self.next_index);
        self.next_index += 1;
        name
    }

    /// Creates a session named `进程{n}` and starts `argv` in it.
    ///
    /// A process that fails to spawn still yields a session (settled with
    /// a synthetic exit code); only an empty argv is refused outright.
    pub fn start_tool_run(&mut self, tool_name: &str, argv: Vec<String>) -> Result<SessionId, AppError> {
        let working_dir = self.config.working_dir.clone();
        self.spawn_session(tool_name, argv, working_dir)
    }

    #[instrument(skip(self, argv), fields(tool = %tool_name))]
    fn spawn_session(
        &mut self,
        tool_name: &str,
        argv: Vec<String>,
        working_dir: Option<PathBuf>,
    ) -> Result<SessionId, AppError> {
        if argv.is_empty() {
            let err = AppError::InvalidCommand("argv is empty".to_string());
            self.system.log_line(&format!("{}: {}", tool_name, err), LogLevel::Error);
            return Err(err);
        }

        let id = SessionId::new();
        let name = self.next_name();
        let mut session = TerminalSession::new(id, &name, &self.config.prompt);
        if let Some(sink) = open_sink(&self.config, tool_name, &name) {
            session = session.with_log(sink);
        }

        let options = ProcessOptions {
            working_dir,
            stop_grace: self.config.stop_grace,
        };
        let handle = ChildProcessHandle::new(id, self.events_tx.clone(), options);

        self.system
            .log_line(&format!("启动 {} ({}): {}", tool_name, name, argv.join(" ")), LogLevel::Info);
        match session.start(handle, &argv) {
            Ok(()) => info!(session = %id, name = %name, pid = ?session.pid(), "Tool run started"),
            Err(e) => {
                warn!(session = %id, name = %name, error = %e, "Tool run failed to start");
                self.system
                    .log_line(&format!("{} 启动失败: {}", name, e), LogLevel::Error);
            }
        }

        self.sessions.insert(id, session);
        Ok(id)
    }

    /// Builds argv from a typed run command and pre-serialized tokens, then
    /// starts it. The tool's base directory becomes the working directory
    /// only when configured to.
    pub fn start_command(
        &mut self,
        tool_name: &str,
        base_dir: &Path,
        raw_command: &str,
        tokens: &[String],
    ) -> Result<SessionId, AppError> {
        let working_dir = self.config.working_dir_for(base_dir).map(|dir| absolutize(&dir));
        // Relative tool paths would resolve against the pinned cwd.
        let base_dir = match working_dir {
            Some(_) => absolutize(base_dir),
            None => base_dir.to_path_buf(),
        };
        let argv = match self.builder.build(&base_dir, raw_command, tokens) {
            Ok(argv) => argv,
            Err(e) => {
                self.system.log_line(&format!("{}: {}", tool_name, e), LogLevel::Error);
                return Err(e);
            }
        };
        self.spawn_session(tool_name, argv, working_dir)
    }

    /// Validates parameter values, serializes them and starts the tool.
    pub fn launch_tool(
        &mut self,
        tool_name: &str,
        base_dir: &Path,
        raw_command: &str,
        params: &[Parameter],
    ) -> Result<SessionId, AppError> {
        if let Err(e) = validate_parameters(params) {
            self.system.log_line(&format!("{}: {}", tool_name, e), LogLevel::Warning);
            return Err(e);
        }
        let tokens = serialize_parameters(params);
        self.start_command(tool_name, base_dir, raw_command, &tokens)
    }

    /// Stops the session's process. Returns false when nothing was running.
    pub fn stop(&mut self, id: SessionId) -> Result<bool, AppError> {
        let graceful = self.config.graceful_stop;
        let session = self
            .session_mut(id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
        let stopped = session.stop(graceful);
        let name = session.name().to_string();
        if stopped {
            self.system.log_line(&format!("{} 已被用户停止", name), LogLevel::Warning);
        }
        Ok(stopped)
    }

    /// Stops and discards a tool session. The system session stays.
    pub fn close(&mut self, id: SessionId) -> Result<(), AppError> {
        if id == self.system.id() {
            return Err(AppError::SessionNotClosable(SYSTEM_SESSION_NAME.to_string()));
        }
        let mut session = self
            .sessions
            .shift_remove(&id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
        let was_running = session.is_running();
        session.close();
        debug!(session = %id, name = %session.name(), was_running, "Session closed");
        self.system
            .log_line(&format!("{} 已关闭", session.name()), LogLevel::Info);
        Ok(())
    }

    pub fn handle_key(&mut self, id: SessionId, key: Key) -> Result<KeyOutcome, AppError> {
        let session = self
            .session_mut(id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
        Ok(session.handle_key(key))
    }

    /// Waits for the next child event. Never yields `None` while the
    /// supervisor is alive since it holds a sender itself.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events_rx.recv().await
    }

    /// Applies every event already queued without waiting.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Routes one event to its session and narrates completions.
    pub fn handle_event(&mut self, event: ProcessEvent) -> Option<i32> {
        let Some(session) = self.sessions.get_mut(&event.session) else {
            debug!(session = %event.session, "Event for closed session dropped");
            return None;
        };
        let exit_code = session.on_process_event(event.kind)?;
        let name = session.name().to_string();
        if exit_code == 0 {
            self.system
                .log_line(&format!("{} 执行完成，退出码 0", name), LogLevel::Success);
        } else {
            self.system
                .log_line(&format!("{} 异常退出，退出码 {}", name, exit_code), LogLevel::Error);
        }
        Some(exit_code)
    }

    /// Pumps events until the session leaves `Running`.
    pub async fn drive_until_settled(&mut self, id: SessionId) -> Result<Option<i32>, AppError> {
        loop {
            let session = self
                .session(id)
                .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
            if session.state() != SessionState::Running {
                return Ok(session.exit_code());
            }
            match self.next_event().await {
                Some(event) => {
                    self.handle_event(event);
                }
                None => return Ok(None),
            }
        }
    }

    /// Kills every running process and seals all log files.
    pub fn shutdown(&mut self) {
        let running = self.sessions.values().filter(|s| s.is_running()).count();
        info!(sessions = self.sessions.len(), running, "Shutting down supervisor");
        if running > 0 {
            self.system
                .log_line(&format!("退出时终止 {} 个运行中的进程", running), LogLevel::Warning);
        }
        for session in self.sessions.values_mut() {
            session.close();
        }
        self.system.close();
    }
}

fn open_sink(config: &Config, tool_name: &str, process_name: &str) -> Option<SessionLogSink> {
    config
        .file_logging
        .then(|| SessionLogSink::open(&config.log_dir, tool_name, process_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessEventKind;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn supervisor() -> (ProcessSupervisor, TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            log_dir: tmp.path().join("logs"),
            stop_grace: Duration::from_millis(200),
            ..Config::default()
        };
        (ProcessSupervisor::new(Arc::new(config)), tmp)
    }

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn settle(sup: &mut ProcessSupervisor, id: SessionId) -> Option<i32> {
        timeout(Duration::from_secs(10), sup.drive_until_settled(id))
            .await
            .expect("session did not settle in time")
            .unwrap()
    }

    #[tokio::test]
    async fn system_session_exists_and_cannot_be_closed() {
        let (mut sup, _tmp) = supervisor();
        let system_id = sup.system_session().id();
        assert_eq!(sup.system_session().name(), SYSTEM_SESSION_NAME);
        assert!(matches!(sup.close(system_id), Err(AppError::SessionNotClosable(_))));
        assert!(matches!(sup.close(SessionId::new()), Err(AppError::SessionNotFound(_))));
        assert!(!sup.stop(system_id).unwrap());
        assert_eq!(sup.summaries().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn display_names_are_never_reused() {
        let (mut sup, _tmp) = supervisor();
        let first = sup.start_tool_run("demo", argv(&["true"])).unwrap();
        let second = sup.start_tool_run("demo", argv(&["true"])).unwrap();
        assert_eq!(sup.session(first).unwrap().name(), "进程1");
        assert_eq!(sup.session(second).unwrap().name(), "进程2");

        sup.close(second).unwrap();
        let third = sup.start_tool_run("demo", argv(&["true"])).unwrap();
        assert_eq!(sup.session(third).unwrap().name(), "进程3");
        assert!(sup.session(second).is_none());
        sup.shutdown();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hello_run_shows_output_then_success_and_is_logged() {
        let (mut sup, _tmp) = supervisor();
        let id = sup
            .start_tool_run("echo", argv(&["sh", "-c", "printf 'hello\\n'"]))
            .unwrap();
        assert_eq!(settle(&mut sup, id).await, Some(0));

        let session = sup.session(id).unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        let text = session.text();
        let hello = text.find("hello\n").expect("output missing");
        let success = text.find("[成功]").expect("success annotation missing");
        assert!(hello < success);
        assert!(session
            .spans()
            .iter()
            .any(|span| span.style == crate::terminal::SpanStyle::Success));

        let log_path = session.log_sink().and_then(|l| l.terminal_path()).unwrap().to_path_buf();
        assert!(log_path.to_string_lossy().contains("echo"));
        sup.close(id).unwrap();

        let transcript = std::fs::read_to_string(log_path).unwrap();
        assert!(transcript.starts_with("终端日志 - echo / 进程1\n"));
        assert_eq!(transcript.matches("OUTPUT: hello").count(), 1);
        assert!(transcript.contains("会话结束: "));
        assert!(sup.system_session().text().contains("进程1 执行完成，退出码 0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_narrated_as_error() {
        let (mut sup, _tmp) = supervisor();
        let id = sup.start_tool_run("fail", argv(&["sh", "-c", "echo bad >&2; exit 2"])).unwrap();
        assert_eq!(settle(&mut sup, id).await, Some(2));

        let session = sup.session(id).unwrap();
        assert!(session.text().contains("bad\n"));
        assert!(session.text().contains("[错误] 进程异常退出 (退出码 2)"));
        assert!(sup.system_session().text().contains("进程1 异常退出，退出码 2"));
    }

    #[tokio::test]
    async fn spawn_failure_settles_session_with_synthetic_code() {
        let (mut sup, _tmp) = supervisor();
        let id = sup
            .start_tool_run("ghost", argv(&["/nonexistent/toolbox-ghost"]))
            .unwrap();

        let session = sup.session(id).unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert_eq!(session.exit_code(), Some(crate::terminal::SPAWN_FAILURE_EXIT_CODE));
        assert!(session.text().contains("[错误] 启动失败"));
        assert!(sup.system_session().text().contains("进程1 启动失败"));
        assert_eq!(settle(&mut sup, id).await, Some(-1));
    }

    #[tokio::test]
    async fn empty_argv_is_refused_without_a_session() {
        let (mut sup, _tmp) = supervisor();
        assert!(matches!(sup.start_tool_run("none", Vec::new()), Err(AppError::InvalidCommand(_))));
        assert_eq!(sup.summaries().len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn finished_session_is_sealed() {
        let (mut sup, _tmp) = supervisor();
        let id = sup.start_tool_run("echo", argv(&["sh", "-c", "echo done"])).unwrap();
        settle(&mut sup, id).await;

        let before = sup.session(id).unwrap().text().to_string();
        let late = ProcessEvent {
            session: id,
            kind: ProcessEventKind::Stdout(b"late output\n".to_vec()),
        };
        assert_eq!(sup.handle_event(late), None);
        assert_eq!(sup.session(id).unwrap().text(), before);

        for c in "more".chars() {
            sup.handle_key(id, Key::Char(c)).unwrap();
        }
        sup.handle_key(id, Key::Enter).unwrap();
        let text = sup.session(id).unwrap().text();
        assert!(text.contains("[错误] 输入发送失败"));
        assert!(!text.contains("late output"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn submitted_lines_reach_stdin() {
        let (mut sup, _tmp) = supervisor();
        let id = sup.start_tool_run("cat", argv(&["cat"])).unwrap();
        for c in "ping".chars() {
            sup.handle_key(id, Key::Char(c)).unwrap();
        }
        sup.handle_key(id, Key::Enter).unwrap();

        let echoed = timeout(Duration::from_secs(10), async {
            loop {
                let event = sup.next_event().await.unwrap();
                sup.handle_event(event);
                let session = sup.session(id).unwrap();
                if session.history_text().matches("ping").count() >= 2 {
                    return true;
                }
            }
        })
        .await
        .unwrap();
        assert!(echoed);

        let session = sup.session(id).unwrap();
        assert_eq!(session.history().entries(), &["ping"]);
        assert!(session
            .spans()
            .iter()
            .any(|span| span.style == crate::terminal::SpanStyle::Input));

        assert!(sup.stop(id).unwrap());
        assert_eq!(sup.session(id).unwrap().state(), SessionState::Stopped);
        assert!(!sup.stop(id).unwrap());
        assert!(sup.system_session().text().contains("进程1 已被用户停止"));
    }

    async fn pump_until(sup: &mut ProcessSupervisor, id: SessionId, needle: &str) {
        timeout(Duration::from_secs(10), async {
            while !sup.session(id).unwrap().history_text().contains(needle) {
                let event = sup.next_event().await.unwrap();
                sup.handle_event(event);
            }
        })
        .await
        .expect("expected output did not arrive");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_key_reaches_running_process() {
        let (mut sup, _tmp) = supervisor();
        let script = "trap 'echo got-int; exit 7' INT; echo ready; while :; do sleep 0.1; done";
        let id = sup.start_tool_run("trap", argv(&["sh", "-c", script])).unwrap();
        pump_until(&mut sup, id, "ready\n").await;

        assert_eq!(sup.handle_key(id, Key::Interrupt).unwrap(), KeyOutcome::Handled);
        assert!(sup.session(id).unwrap().text().contains("[警告] 已发送中断信号"));

        assert_eq!(settle(&mut sup, id).await, Some(7));
        let text = sup.session(id).unwrap().text();
        let sent = text.find("已发送中断信号").unwrap();
        let caught = text.find("got-int\n").unwrap();
        assert!(sent < caught);
        assert!(text.contains("进程异常退出 (退出码 7)"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn graceful_stop_interrupts_then_kills() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            log_dir: tmp.path().join("logs"),
            graceful_stop: true,
            stop_grace: Duration::from_millis(200),
            ..Config::default()
        };
        let mut sup = ProcessSupervisor::new(Arc::new(config));
        // Ignores SIGINT, so only the escalation to a kill can end it.
        let script = "trap '' INT; echo ready; while :; do sleep 0.1; done";
        let id = sup.start_tool_run("stubborn", argv(&["sh", "-c", script])).unwrap();
        pump_until(&mut sup, id, "ready\n").await;

        assert!(sup.stop(id).unwrap());
        assert_eq!(sup.session(id).unwrap().state(), SessionState::Stopped);

        let event = timeout(Duration::from_secs(10), async {
            loop {
                let event = sup.next_event().await.unwrap();
                if matches!(event.kind, ProcessEventKind::Finished { .. }) {
                    return event;
                }
            }
        })
        .await
        .expect("graceful stop never escalated to a kill");
        assert!(matches!(
            event.kind,
            ProcessEventKind::Finished { status: crate::process::ExitKind::Crashed, .. }
        ));
        sup.handle_event(event);
        assert_eq!(sup.session(id).unwrap().state(), SessionState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stopped_session_ignores_its_final_event() {
        let (mut sup, _tmp) = supervisor();
        let id = sup.start_tool_run("sleep", argv(&["sleep", "30"])).unwrap();
        assert!(sup.stop(id).unwrap());

        let event = timeout(Duration::from_secs(10), sup.next_event()).await.unwrap().unwrap();
        assert!(matches!(event.kind, ProcessEventKind::Finished { .. }));
        assert_eq!(sup.handle_event(event), None);

        let session = sup.session(id).unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.exit_code(), None);
    }

    #[tokio::test]
    async fn launch_tool_rejects_missing_required_values() {
        let (mut sup, tmp) = supervisor();
        let params = vec![Parameter::text("目标", "-u", "  ").required()];
        let err = sup.launch_tool("OneForAll", tmp.path(), "python oneforall.py", &params).unwrap_err();
        assert!(matches!(err, AppError::InvalidParameter(_)));
        assert_eq!(sup.summaries().len(), 1);
        assert!(sup.system_session().text().contains("[警告] OneForAll"));
    }

    #[tokio::test]
    async fn launch_tool_reports_empty_command() {
        let (mut sup, tmp) = supervisor();
        let err = sup.launch_tool("Nmap", tmp.path(), "   ", &[]).unwrap_err();
        assert!(matches!(err, AppError::InvalidCommand(_)));
        assert!(sup.system_session().text().contains("[错误] Nmap"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_tool_runs_script_with_parameters() {
        use std::os::unix::fs::PermissionsExt;

        let (mut sup, tmp) = supervisor();
        let tool_dir = tmp.path().join("tools").join("Echo");
        std::fs::create_dir_all(&tool_dir).unwrap();
        let script = tool_dir.join("echo-args");
        std::fs::write(&script, "#!/bin/sh\necho \"$@\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let params = vec![
            Parameter::flag("详细", "-v", true),
            Parameter::flag("静默", "-q", false),
            Parameter::text("目标", "", "example.com").required(),
        ];
        let id = sup.launch_tool("Echo", &tool_dir, "echo-args --fast", &params).unwrap();
        assert_eq!(settle(&mut sup, id).await, Some(0));
        assert!(sup.session(id).unwrap().text().contains("--fast -v example.com\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relative_tool_dir_runs_inside_that_dir() {
        use std::os::unix::fs::PermissionsExt;

        let cwd = std::env::current_dir().unwrap();
        let tmp = tempfile::Builder::new().prefix("toolbox-rel-").tempdir_in(&cwd).unwrap();
        let relative_root = PathBuf::from(tmp.path().file_name().unwrap());
        let base_dir = relative_root.join("tools").join("Echo");
        std::fs::create_dir_all(&base_dir).unwrap();
        let script = base_dir.join("echo-args");
        std::fs::write(&script, "#!/bin/sh\npwd\necho \"$@\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = Config {
            log_dir: tmp.path().join("logs"),
            run_in_tool_dir: true,
            ..Config::default()
        };
        let mut sup = ProcessSupervisor::new(Arc::new(config));
        let id = sup
            .start_command("Echo", &base_dir, "echo-args", &["x".to_string()])
            .unwrap();
        assert_eq!(settle(&mut sup, id).await, Some(0));

        let text = sup.session(id).unwrap().text();
        assert!(!text.contains("启动失败"), "{}", text);
        assert!(text.contains("/tools/Echo\n"));
        assert!(text.contains("\nx\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn closing_running_session_records_why_it_ended() {
        let (mut sup, _tmp) = supervisor();
        let id = sup.start_tool_run("sleep", argv(&["sleep", "30"])).unwrap();
        let log_path = sup
            .session(id)
            .and_then(|s| s.log_sink())
            .and_then(|l| l.system_path())
            .unwrap()
            .to_path_buf();

        sup.close(id).unwrap();
        let content = std::fs::read_to_string(log_path).unwrap();
        let stopped = content.find("[WARNING] 会话关闭，进程已终止").expect("stop not logged");
        let footer = content.find("会话结束: ").unwrap();
        assert!(stopped < footer);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn shutdown_stops_running_sessions_and_seals_logs() {
        let (mut sup, _tmp) = supervisor();
        let id = sup.start_tool_run("sleep", argv(&["sleep", "30"])).unwrap();
        let log_path = sup
            .session(id)
            .and_then(|s| s.log_sink())
            .and_then(|l| l.system_path())
            .unwrap()
            .to_path_buf();

        sup.shutdown();
        assert_eq!(sup.session(id).unwrap().state(), SessionState::Stopped);
        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.trim_end().lines().last().unwrap().starts_with("会话结束: "));

        let summaries = sup.summaries();
        assert_eq!(summaries.len(), 2);
        let json = serde_json::to_string(&summaries).unwrap();
        assert!(json.contains("\"name\":\"进程1\""));
        assert!(json.contains("\"state\":\"Stopped\""));
    }

    #[test]
    fn file_logging_can_be_disabled() {
        let config = Config {
            file_logging: false,
            ..Config::default()
        };
        let sup = ProcessSupervisor::new(Arc::new(config));
        assert!(sup.system_session().log_sink().is_none());
    }
}
