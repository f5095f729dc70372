use crate::utils::path_utils::expand_tilde;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PROMPT: &str = ">>> ";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_dir: PathBuf,
    pub file_logging: bool,
    pub prompt: String,
    pub working_dir: Option<PathBuf>,
    pub run_in_tool_dir: bool,
    pub graceful_stop: bool,
    pub stop_grace: Duration,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_dir: PathBuf::from("logs"),
            file_logging: true,
            prompt: DEFAULT_PROMPT.to_string(),
            working_dir: None,
            run_in_tool_dir: false,
            graceful_stop: false,
            stop_grace: Duration::from_millis(1500),
            log_level: "info".to_string(),
        }
    }
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(anyhow::anyhow!("Invalid boolean for {}: {}", name, other)),
        },
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Config::default();

        let log_dir = match std::env::var("TOOLBOX_LOG_DIR") {
            Ok(raw) if !raw.trim().is_empty() => expand_tilde(raw.trim())
                .with_context(|| format!("Invalid TOOLBOX_LOG_DIR: {}", raw))?,
            _ => defaults.log_dir,
        };

        let file_logging = env_flag("TOOLBOX_FILE_LOGGING", defaults.file_logging)?;

        let prompt = std::env::var("TOOLBOX_PROMPT")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.prompt);

        let working_dir = match std::env::var("TOOLBOX_WORKING_DIR") {
            Ok(raw) if !raw.trim().is_empty() => {
                let dir = expand_tilde(raw.trim())
                    .with_context(|| format!("Invalid TOOLBOX_WORKING_DIR: {}", raw))?;
                if !dir.is_dir() {
                    anyhow::bail!("TOOLBOX_WORKING_DIR is not a valid directory: {:?}", dir);
                }
                Some(dir)
            }
            _ => None,
        };

        let run_in_tool_dir = env_flag("TOOLBOX_TOOL_CWD", defaults.run_in_tool_dir)?;
        let graceful_stop = env_flag("TOOLBOX_GRACEFUL_STOP", defaults.graceful_stop)?;

        let stop_grace = std::env::var("TOOLBOX_STOP_GRACE_MS")
            .unwrap_or_else(|_| "1500".to_string())
            .parse::<u64>()
            .map(Duration::from_millis)
            .context("Invalid TOOLBOX_STOP_GRACE_MS")?;

        let log_level = std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Config {
            log_dir,
            file_logging,
            prompt,
            working_dir,
            run_in_tool_dir,
            graceful_stop,
            stop_grace,
            log_level,
        })
    }

    /// Directory a tool rooted at `base_dir` should run in, if pinned at all.
    pub fn working_dir_for(&self, base_dir: &std::path::Path) -> Option<PathBuf> {
        if let Some(dir) = &self.working_dir {
            return Some(dir.clone());
        }
        if self.run_in_tool_dir && base_dir.is_dir() {
            return Some(base_dir.to_path_buf());
        }
        None
    }
}
