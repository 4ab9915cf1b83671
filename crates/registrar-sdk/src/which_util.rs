use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Locates executables, either by explicit path or on `PATH`.
pub struct WhichUtil;

impl WhichUtil {
    /// Locate `command`.
    ///
    /// - A command containing a path separator is checked as-is and must exist.
    /// - Otherwise `PATH` is searched.
    /// - If `require` is true and the command is not found, returns an error.
    /// - If `require` is false and the command is not found, returns `Ok(None)`.
    pub fn which(command: &str, require: bool) -> Result<Option<PathBuf>> {
        if command.is_empty() {
            if require {
                anyhow::bail!("command must not be empty");
            }
            return Ok(None);
        }

        let command_path = Path::new(command);
        if command_path.components().count() > 1 {
            if command_path.is_file() {
                return Ok(Some(command_path.to_path_buf()));
            }
            if require {
                anyhow::bail!("{command}: no such executable");
            }
            return Ok(None);
        }

        match which::which(command) {
            Ok(found) => Ok(Some(found)),
            Err(e) if require => Err(e).with_context(|| {
                format!(
                    "{command}: command not found. Make sure '{command}' is installed and its location included in the 'PATH' environment variable."
                )
            }),
            Err(_) => Ok(None),
        }
    }
}
