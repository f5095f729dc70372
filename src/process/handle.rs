use super::{ExitKind, ProcessEvent, ProcessEventKind, SessionId};
use crate::error::AppError;
use serde::Serialize;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio as StdProcessStdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, Signal, System};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Ctrl+C as a byte, the portable stand-in for SIGINT.
pub const INTERRUPT_BYTE: u8 = 0x03;

const READ_CHUNK: usize = 4096;
// Grandchildren may keep a pipe open after the direct child exits.
const READER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub working_dir: Option<PathBuf>,
    /// Time between the interrupt and the forced kill of a graceful stop.
    pub stop_grace: Duration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            working_dir: None,
            stop_grace: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandleState {
    NotStarted,
    Running,
    Finished,
}

/// One OS child process with piped stdio.
///
/// Output and completion are delivered as [`ProcessEvent`]s on the channel
/// given at construction; nothing here blocks the caller. The reader tasks
/// are joined before `Finished` is sent, so no output event for this
/// session follows it.
#[derive(Debug)]
pub struct ChildProcessHandle {
    session: SessionId,
    options: ProcessOptions,
    events: mpsc::UnboundedSender<ProcessEvent>,
    state: HandleState,
    exit_code: Option<i32>,
    pid: Option<u32>,
    stdin_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    exited: Arc<AtomicBool>,
    kill: Arc<Notify>,
}

impl ChildProcessHandle {
    pub fn new(session: SessionId, events: mpsc::UnboundedSender<ProcessEvent>, options: ProcessOptions) -> Self {
        Self {
            session,
            options,
            events,
            state: HandleState::NotStarted,
            exit_code: None,
            pid: None,
            stdin_tx: None,
            exited: Arc::new(AtomicBool::new(false)),
            kill: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.state == HandleState::Running && !self.exited.load(Ordering::SeqCst)
    }

    /// Spawns `argv`. Must be called from within a Tokio runtime.
    #[instrument(skip(self, argv), fields(session = %self.session))]
    pub fn start(&mut self, argv: &[String]) -> Result<(), AppError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AppError::InvalidCommand("argv is empty".to_string()))?;
        if self.state != HandleState::NotStarted {
            return Err(AppError::SpawnError {
                program: program.clone(),
                reason: "process handle was already started".to_string(),
            });
        }

        let mut command = TokioCommand::new(program);
        command
            .args(args)
            .stdin(StdProcessStdio::piped())
            .stdout(StdProcessStdio::piped())
            .stderr(StdProcessStdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.options.working_dir {
            command.current_dir(dir);
        }

        debug!(program = %program, ?args, cwd = ?self.options.working_dir, "Spawning child process");
        let mut child = command.spawn().map_err(|e| {
            error!(error = %e, program = %program, "Failed to spawn child process");
            AppError::SpawnError {
                program: program.clone(),
                reason: e.to_string(),
            }
        })?;

        self.pid = child.id();

        if let Some(stdin) = child.stdin.take() {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(write_stdin(stdin, rx, self.session));
            self.stdin_tx = Some(tx);
        }

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_output(stdout, self.session, self.events.clone(), false)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_output(stderr, self.session, self.events.clone(), true)));
        }

        tokio::spawn(wait_for_exit(
            child,
            readers,
            self.exited.clone(),
            self.kill.clone(),
            self.events.clone(),
            self.session,
        ));

        self.state = HandleState::Running;
        info!(pid = ?self.pid, program = %program, "Child process started");
        Ok(())
    }

    /// Queues bytes for the child's stdin.
    pub fn write(&self, bytes: &[u8]) -> Result<(), AppError> {
        match self.state {
            HandleState::NotStarted => {
                return Err(AppError::StdinWriteError("process was never started".to_string()))
            }
            HandleState::Finished => {
                return Err(AppError::StdinWriteError("process has finished".to_string()))
            }
            HandleState::Running if self.exited.load(Ordering::SeqCst) => {
                return Err(AppError::StdinWriteError("process has finished".to_string()))
            }
            HandleState::Running => {}
        }
        let tx = self
            .stdin_tx
            .as_ref()
            .ok_or_else(|| AppError::StdinWriteError("stdin is not available".to_string()))?;
        tx.send(bytes.to_vec())
            .map_err(|_| AppError::StdinWriteError("stdin pipe is closed".to_string()))
    }

    /// Best-effort interrupt: SIGINT where the OS allows, else `0x03` on stdin.
    pub fn interrupt(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        if let Some(pid) = self.pid {
            if send_interrupt_signal(pid) {
                debug!(session = %self.session, pid, "Interrupt signal delivered");
                return true;
            }
        }
        debug!(session = %self.session, "Falling back to interrupt byte on stdin");
        self.write(&[INTERRUPT_BYTE]).is_ok()
    }

    /// Stops the process. Graceful interrupts first and kills after the
    /// grace period; otherwise kills immediately. No-op once finished.
    pub fn terminate(&self, graceful: bool) {
        if !self.is_running() {
            return;
        }
        if graceful {
            self.interrupt();
            let kill = self.kill.clone();
            let exited = self.exited.clone();
            let grace = self.options.stop_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if !exited.load(Ordering::SeqCst) {
                    kill.notify_one();
                }
            });
        } else {
            self.kill.notify_one();
        }
        info!(session = %self.session, pid = ?self.pid, graceful, "Termination requested");
    }

    /// Records the completion delivered through the event channel.
    pub fn mark_finished(&mut self, exit_code: i32) {
        self.state = HandleState::Finished;
        self.exit_code = Some(exit_code);
        self.stdin_tx = None;
    }
}

impl Drop for ChildProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            self.kill.notify_one();
        }
    }
}

fn send_interrupt_signal(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return false;
    }
    system
        .process(pid)
        .and_then(|process| process.kill_with(Signal::Interrupt))
        .unwrap_or(false)
}

async fn write_stdin(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>, session: SessionId) {
    while let Some(bytes) = rx.recv().await {
        let written = match stdin.write_all(&bytes).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(session = %session, error = %e, "Child stdin closed");
            break;
        }
    }
}

async fn pump_output<R>(mut reader: R, session: SessionId, events: mpsc::UnboundedSender<ProcessEvent>, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let bytes = buf[..n].to_vec();
                let kind = if is_stderr {
                    ProcessEventKind::Stderr(bytes)
                } else {
                    ProcessEventKind::Stdout(bytes)
                };
                if events.send(ProcessEvent { session, kind }).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(session = %session, error = %e, is_stderr, "Failed to read child output");
                break;
            }
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    exited: Arc<AtomicBool>,
    kill: Arc<Notify>,
    events: mpsc::UnboundedSender<ProcessEvent>,
    session: SessionId,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.notified() => {
            if let Err(e) = child.start_kill() {
                warn!(session = %session, error = %e, "Failed to kill child process");
            }
            child.wait().await
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(READER_DRAIN, &mut reader).await.is_err() {
            debug!(session = %session, "Output pipe still open after exit; abandoning reader");
            reader.abort();
            let _ = reader.await;
        }
    }

    let (exit_code, status) = match status {
        Ok(status) => exit_code_of(&status),
        Err(e) => {
            error!(session = %session, error = %e, "Failed to wait for child process");
            (-1, ExitKind::Crashed)
        }
    };

    exited.store(true, Ordering::SeqCst);
    info!(session = %session, exit_code, ?status, "Child process finished");
    let _ = events.send(ProcessEvent {
        session,
        kind: ProcessEventKind::Finished { exit_code, status },
    });
}

fn exit_code_of(status: &ExitStatus) -> (i32, ExitKind) {
    if let Some(code) = status.code() {
        return (code, ExitKind::Normal);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal, ExitKind::Crashed);
        }
    }
    (-1, ExitKind::Crashed)
}
