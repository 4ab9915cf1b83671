// Error taxonomy for a reconciliation run.
// Every variant is fatal: the run aborts and the configuration file is left
// exactly as it was loaded.

use std::path::PathBuf;

/// Result alias used across the registrar crates.
pub type Result<T, E = RegistrarError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum RegistrarError {
    /// The on-disk configuration file is not valid TOML.
    #[error("failed to parse config file '{}': {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    /// The template file exists but is not valid TOML.
    #[error("failed to parse template file '{}': {message}", path.display())]
    TemplateParse { path: PathBuf, message: String },

    /// The external binary could not be started or exited non-zero.
    #[error("{operation} failed: {message}")]
    ProcessInvocation {
        operation: String,
        message: String,
        /// `None` when the process never started.
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// An entry for the runner exists but its identity cannot be trusted.
    #[error(
        "ambiguous state for runner '{name}': {reason}; re-run with recreate to replace the entry"
    )]
    AmbiguousState { name: String, reason: String },

    /// Desired-state inputs are conflicting or malformed.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The runner service is not in a state where registration can proceed.
    #[error("preflight check failed: {message}")]
    Preflight {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("I/O error on '{}': {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl RegistrarError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Captured subprocess output, when the failure carries any.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            Self::ProcessInvocation { stdout, stderr, .. } | Self::Preflight { stdout, stderr, .. } => {
                Some((stdout.as_str(), stderr.as_str()))
            }
            _ => None,
        }
    }

    /// Short machine-friendly name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParse { .. } => "config_parse",
            Self::TemplateParse { .. } => "template_parse",
            Self::ProcessInvocation { .. } => "process_invocation",
            Self::AmbiguousState { .. } => "ambiguous_state",
            Self::Validation(_) => "validation",
            Self::Preflight { .. } => "preflight",
            Self::Io { .. } => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_state_recommends_recreate() {
        let err = RegistrarError::AmbiguousState {
            name: "host1".into(),
            reason: "token is missing".into(),
        };
        let text = err.to_string();
        assert!(text.contains("host1"));
        assert!(text.contains("recreate"));
        assert_eq!(err.kind(), "ambiguous_state");
    }

    #[test]
    fn captured_output_only_for_process_failures() {
        let err = RegistrarError::ProcessInvocation {
            operation: "register".into(),
            message: "exit code 1".into(),
            exit_code: Some(1),
            stdout: "out".into(),
            stderr: "err".into(),
        };
        assert_eq!(err.captured_output(), Some(("out", "err")));
        assert!(RegistrarError::validation("x").captured_output().is_none());
    }

    #[test]
    fn config_parse_mentions_path() {
        let err = RegistrarError::ConfigParse {
            path: PathBuf::from("/etc/gitlab-runner/config.toml"),
            message: "expected `=`".into(),
        };
        assert!(err.to_string().contains("/etc/gitlab-runner/config.toml"));
    }
}
