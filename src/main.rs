use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use toolbox::terminal::Key;
use toolbox::{Config, ProcessSupervisor, SessionId};
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

/// Run one security tool inside an interactive terminal session.
#[derive(Debug, Parser)]
#[command(name = "toolbox", version)]
struct Args {
    /// Name used for the log directory; defaults to the base directory name.
    #[arg(long)]
    tool_name: Option<String>,

    /// Directory the tool is installed in.
    base_dir: PathBuf,

    /// Run command, e.g. "python oneforall.py" or "nmap -sV".
    command: String,

    /// Parameter tokens appended after the run command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    params: Vec<String>,
}

fn setup_logging(log_level_str: &str) {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("toolbox={}", level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

/// Prints scrollback that has not been shown yet.
struct Mirror {
    printed: usize,
}

impl Mirror {
    fn sync(&mut self, supervisor: &ProcessSupervisor, id: SessionId) -> Result<()> {
        let Some(session) = supervisor.session(id) else {
            return Ok(());
        };
        let text = session.history_text();
        if text.len() < self.printed {
            // Cleared.
            self.printed = 0;
        }
        if text.len() > self.printed {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text[self.printed..].as_bytes())?;
            stdout.flush()?;
            self.printed = text.len();
        }
        Ok(())
    }
}

/// Returns false when the front end should exit.
fn handle_line(supervisor: &mut ProcessSupervisor, id: SessionId, line: &str) -> Result<bool> {
    match line.trim() {
        ":quit" => return Ok(false),
        ":stop" => {
            supervisor.stop(id)?;
        }
        ":clear" => {
            supervisor.handle_key(id, Key::Clear)?;
        }
        ":history" => {
            if let Some(session) = supervisor.session(id) {
                let mut stdout = std::io::stdout().lock();
                for (n, entry) in session.history().entries().iter().enumerate() {
                    writeln!(stdout, "{:>4}  {}", n + 1, entry)?;
                }
            }
        }
        _ => {
            supervisor.handle_key(id, Key::Paste(line.to_string()))?;
            supervisor.handle_key(id, Key::Enter)?;
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load().context("Failed to load configuration")?;
    setup_logging(&config.log_level);

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), "Starting toolbox");
    tracing::debug!(?config, "Loaded configuration");

    let tool_name = args.tool_name.clone().unwrap_or_else(|| {
        args.base_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tool".to_string())
    });

    let mut supervisor = ProcessSupervisor::new(Arc::new(config));
    let id = supervisor.start_command(&tool_name, &args.base_dir, &args.command, &args.params)?;
    let mut mirror = Mirror { printed: 0 };
    mirror.sync(&supervisor, id)?;

    let (lines_tx, mut lines_rx) = mpsc::unbounded_channel::<String>();
    // Blocking stdin reads cannot be cancelled; a detached thread keeps them
    // from holding the runtime open at exit.
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if lines_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read console input");
                    break;
                }
            }
        }
    });

    let mut stdin_open = true;
    loop {
        let settled = supervisor
            .session(id)
            .map(|s| s.state().is_settled())
            .unwrap_or(true);
        if settled {
            break;
        }

        tokio::select! {
            line = lines_rx.recv(), if stdin_open => match line {
                Some(line) => {
                    if !handle_line(&mut supervisor, id, &line)? {
                        break;
                    }
                }
                None => {
                    tracing::debug!("Console input closed; waiting for the tool to finish");
                    stdin_open = false;
                }
            },
            event = supervisor.next_event() => {
                if let Some(event) = event {
                    supervisor.handle_event(event);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(session = %id, "Ctrl+C received; stopping tool");
                supervisor.stop(id)?;
            }
        }
        mirror.sync(&supervisor, id)?;
    }

    supervisor.drain_events();
    mirror.sync(&supervisor, id)?;
    supervisor.shutdown();

    let summaries = serde_json::to_string_pretty(&supervisor.summaries())?;
    println!("{}", summaries);

    tracing::info!("Toolbox shutdown.");
    Ok(())
}
