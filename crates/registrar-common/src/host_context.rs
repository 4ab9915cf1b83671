// HostContext: the application context of one registrar run.
// Owns file locations, the shared secret masker and the trace factory.

use crate::constants::{self, WellKnownConfigFile};
use crate::secret_masker::SecretMasker;
use crate::tracing::{TraceEventType, TraceManager, TraceSetting, Tracing};

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File locations a run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub runner_config: PathBuf,
    pub system_id: PathBuf,
    /// Name or path of the runner binary.
    pub runner_binary: String,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            runner_config: PathBuf::from(constants::path::RUNNER_CONFIG),
            system_id: PathBuf::from(constants::path::RUNNER_SYSTEM_ID),
            runner_binary: constants::path::RUNNER_BINARY.to_string(),
        }
    }
}

/// Context shared by every component of a run.
pub struct HostContext {
    paths: HostPaths,

    /// Secret masker shared across the whole run.
    pub secret_masker: Arc<SecretMasker>,

    trace_manager: TraceManager,
}

impl HostContext {
    pub fn new(paths: HostPaths) -> Arc<Self> {
        let secret_masker = Arc::new(SecretMasker::new());

        let verbose = env::var(constants::variables::PRINT_LOG_TO_STDOUT)
            .ok()
            .and_then(|v| registrar_sdk::StringUtil::convert_to_bool(&v))
            .unwrap_or(false);
        let trace_setting = TraceSetting {
            level: if verbose {
                TraceEventType::Verbose
            } else {
                TraceEventType::Information
            },
        };
        let trace_manager = TraceManager::with_setting(secret_masker.clone(), trace_setting);

        Arc::new(Self {
            paths,
            secret_masker,
            trace_manager,
        })
    }

    /// Resolve the path of a well-known file.
    pub fn get_config_file(&self, file: WellKnownConfigFile) -> PathBuf {
        match file {
            WellKnownConfigFile::RunnerConfig => self.paths.runner_config.clone(),
            WellKnownConfigFile::SystemId => self.paths.system_id.clone(),
        }
    }

    /// Directory holding the runner configuration file.
    pub fn config_directory(&self) -> &Path {
        match self.paths.runner_config.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    pub fn runner_binary(&self) -> &str {
        &self.paths.runner_binary
    }

    /// Create a named trace source.
    pub fn get_trace(&self, name: &str) -> Tracing {
        self.trace_manager.get(name)
    }

    /// Register a value that must never appear in logs or reports.
    pub fn add_secret(&self, value: &str) {
        self.secret_masker.add_value(value);
    }

    pub fn mask(&self, value: &str) -> String {
        self.secret_masker.mask_secrets(value)
    }
}
