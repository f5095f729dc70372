use crate::error::AppError;
use crate::utils::path_utils::resolve_in;
use std::path::Path;
use tracing::{debug, warn};

const INTERPRETERS: &[&str] = &["python", "python3"];

#[cfg(windows)]
const PLATFORM_EXTENSIONS: &[&str] = &[".exe", ".bat", ".cmd"];
#[cfg(not(windows))]
const PLATFORM_EXTENSIONS: &[&str] = &[];

/// Turns a typed run command plus serialized parameter tokens into argv.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    extensions: Vec<String>,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::with_extensions(PLATFORM_EXTENSIONS)
    }

    /// Builder that probes the given executable suffixes, in order.
    pub fn with_extensions(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn build(&self, base_dir: &Path, raw_command: &str, params: &[String]) -> Result<Vec<String>, AppError> {
        let command_parts: Vec<&str> = raw_command.split_whitespace().collect();
        let Some((&program, rest)) = command_parts.split_first() else {
            return Err(AppError::InvalidCommand(format!(
                "run command is empty: {:?}",
                raw_command
            )));
        };

        let mut argv = Vec::with_capacity(command_parts.len() + params.len() + 1);

        if INTERPRETERS.contains(&program) && !rest.is_empty() {
            if which::which(program).is_err() {
                warn!(interpreter = %program, "Interpreter not found in PATH; launch will likely fail");
            }
            let script = resolve_in(base_dir, rest[0]);
            argv.push(program.to_string());
            argv.push(script.to_string_lossy().into_owned());
            argv.extend(rest[1..].iter().map(|s| s.to_string()));
        } else {
            argv.push(self.resolve_executable(base_dir, program));
            argv.extend(rest.iter().map(|s| s.to_string()));
        }

        argv.extend(params.iter().cloned());
        debug!(?argv, "Built command line");
        Ok(argv)
    }

    fn resolve_executable(&self, base_dir: &Path, name: &str) -> String {
        let bare = resolve_in(base_dir, name);
        for ext in &self.extensions {
            let candidate = resolve_in(base_dir, &format!("{}{}", name, ext));
            if candidate.is_file() {
                return candidate.to_string_lossy().into_owned();
            }
        }
        bare.to_string_lossy().into_owned()
    }
}
