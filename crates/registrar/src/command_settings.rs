// CommandSettings: command-line surface of `gitlab-runner-register`.
// Flags override values from `--params-file`; flags that are not given leave
// the file's values alone.

use clap::Parser;
use registrar_common::constants::{path, variables};
use registrar_common::{toml_util, HostPaths};
use std::collections::HashSet;
use std::path::PathBuf;
use toml::Value;

use crate::configuration::params::{DesiredPresence, EnvironmentVariable, ModuleParams};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("expected KEY=VALUE, got '{0}'")]
    InvalidPair(String),

    #[error("environment variable '{0}' is given more than once")]
    DuplicateEnv(String),

    #[error("failed to read params file '{}': {message}", path.display())]
    ParamsFile { path: PathBuf, message: String },
}

/// Register, re-register or unregister a GitLab runner idempotently.
#[derive(Parser, Debug, Clone)]
#[command(name = "gitlab-runner-register", version, about)]
pub struct CommandSettings {
    /// Coordinator URL, e.g. https://gitlab.com
    #[arg(long = "api-url")]
    pub api_url: Option<String>,

    /// Runner authentication token.
    #[arg(long, env = variables::TOKEN, hide_env_values = true)]
    pub token: Option<String>,

    /// Runner name; keys the entry in the configuration file.
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long, value_enum)]
    pub state: Option<DesiredPresence>,

    #[arg(long)]
    pub executor: Option<String>,

    /// Default image for docker executors.
    #[arg(long = "default-image")]
    pub default_image: Option<String>,

    /// Global parameter as KEY=VALUE; dotted keys address nested tables.
    #[arg(long = "global", value_name = "KEY=VALUE")]
    pub globals: Vec<String>,

    /// Environment variable for the registration process as KEY=VALUE; the
    /// value is passed on verbatim.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub environ_vars: Vec<String>,

    #[arg(long = "template-file")]
    pub template_file: Option<PathBuf>,

    /// Unregister and register again even when nothing changed.
    #[arg(long)]
    pub recreate: bool,

    /// Module arguments as a JSON object.
    #[arg(long = "params-file")]
    pub params_file: Option<PathBuf>,

    #[arg(long, default_value = path::RUNNER_CONFIG)]
    pub config: PathBuf,

    #[arg(long = "system-id-file", default_value = path::RUNNER_SYSTEM_ID)]
    pub system_id_file: PathBuf,

    /// Name or path of the gitlab-runner binary.
    #[arg(long = "runner-bin", default_value = path::RUNNER_BINARY)]
    pub runner_bin: String,

    #[arg(long = "skip-service-check")]
    pub skip_service_check: bool,

    /// Emit logs as JSON lines.
    #[arg(long = "log-json")]
    pub log_json: bool,
}

impl CommandSettings {
    pub fn host_paths(&self) -> HostPaths {
        HostPaths {
            runner_config: self.config.clone(),
            system_id: self.system_id_file.clone(),
            runner_binary: self.runner_bin.clone(),
        }
    }

    /// Assemble module parameters from the params file and the flags.
    pub fn to_params(&self) -> Result<ModuleParams, SettingsError> {
        let mut params = match &self.params_file {
            Some(file) => load_params_file(file)?,
            None => ModuleParams::default(),
        };

        if let Some(v) = &self.api_url {
            params.api_url = v.clone();
        }
        if let Some(v) = &self.token {
            params.token = v.clone();
        }
        if let Some(v) = &self.name {
            params.name = v.clone();
        }
        if let Some(v) = self.state {
            params.state = v;
        }
        if let Some(v) = &self.executor {
            params.executor = Some(v.clone());
        }
        if let Some(v) = &self.default_image {
            params.default_image = Some(v.clone());
        }
        if let Some(v) = &self.template_file {
            params.template_file = Some(v.clone());
        }
        if self.recreate {
            params.recreate = true;
        }

        for pair in &self.globals {
            let (key, raw) = split_pair(pair)?;
            toml_util::set_dotted(&mut params.global_params, key, toml_util::parse_scalar(raw));
        }

        let mut given = HashSet::new();
        for pair in &self.environ_vars {
            let (key, raw) = split_pair(pair)?;
            if !given.insert(key) {
                return Err(SettingsError::DuplicateEnv(key.to_string()));
            }
            let value = Value::String(raw.to_string());
            match params.environ_vars.iter_mut().find(|v| v.name == key) {
                Some(existing) => existing.value = value,
                None => params.environ_vars.push(EnvironmentVariable::new(key, value)),
            }
        }

        Ok(params)
    }
}

fn split_pair(pair: &str) -> Result<(&str, &str), SettingsError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => Err(SettingsError::InvalidPair(pair.to_string())),
    }
}

fn load_params_file(file: &std::path::Path) -> Result<ModuleParams, SettingsError> {
    let text = std::fs::read_to_string(file).map_err(|e| SettingsError::ParamsFile {
        path: file.to_path_buf(),
        message: e.to_string(),
    })?;
    ModuleParams::from_json(&text).map_err(|e| SettingsError::ParamsFile {
        path: file.to_path_buf(),
        message: e.to_string(),
    })
}
