// DesiredStateBuilder: folds module parameters and the optional template file
// into one normalized description of what the runner entry should look like.
//
// Precedence, highest first: explicit options, template file, default globals.
// Environment variables never enter the configuration tree; they are carried
// alongside for the registration process only.

use registrar_common::constants::{self, keys};
use registrar_common::{RegistrarError, Result};
use registrar_sdk::IOUtil;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

use crate::configuration::params::{DesiredPresence, EnvironmentVariable, ModuleParams};
use crate::configuration::validators;

/// One concrete registration: who the runner is and where it talks to.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerIdentity {
    pub token: String,
    pub url: String,
    pub name: String,
    pub executor: Option<String>,
    /// The executor's own section (`[runners.docker]` for docker executors).
    pub executor_params: Table,
}

/// Normalized desired state of one run.
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub presence: DesiredPresence,
    pub identity: RunnerIdentity,
    /// Runner entry fields the caller asked for. Keys not listed here belong to
    /// the service or the operator and are left alone.
    pub runner_fields: Table,
    /// Global keys supplied explicitly (global_params and template top level).
    pub global: Table,
    /// Globals that only fill gaps at registration time.
    pub default_global: Table,
    pub environ_vars: Vec<EnvironmentVariable>,
    pub template_file: Option<PathBuf>,
    pub default_image: Option<String>,
}

/// Name of the nested table holding executor-specific settings.
///
/// `docker`, `docker+machine`, `docker-autoscaler` and `docker-windows` all
/// keep their settings under `[runners.docker]`.
pub fn executor_section(executor: &str) -> &str {
    executor
        .split(['+', '-'])
        .next()
        .unwrap_or(executor)
}

fn is_docker_family(executor: &str) -> bool {
    executor_section(executor) == keys::DOCKER
}

/// Template contents split into runner fields and global keys.
#[derive(Debug, Clone, Default, PartialEq)]
struct TemplateContent {
    runner: Table,
    global: Table,
}

pub struct DesiredStateBuilder {
    default_global: Table,
}

impl Default for DesiredStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DesiredStateBuilder {
    pub fn new() -> Self {
        Self {
            default_global: constants::default_globals(),
        }
    }

    /// Build the desired state for `params`.
    ///
    /// Fails with `TemplateParse` when the template exists but is not valid
    /// TOML and with `Validation` when environment names repeat.
    pub fn build(&self, params: &ModuleParams) -> Result<DesiredState> {
        validators::validate_environ_vars(&params.environ_vars)?;

        let template = match &params.template_file {
            Some(path) => load_template(path)?,
            None => TemplateContent::default(),
        };

        // Runner fields: template first, explicit options on top.
        let mut runner_fields = template.runner;
        runner_fields.insert(keys::NAME.into(), Value::String(params.name.clone()));
        if !params.api_url.is_empty() {
            runner_fields.insert(keys::URL.into(), Value::String(params.api_url.clone()));
        }
        if !params.token.is_empty() {
            runner_fields.insert(keys::TOKEN.into(), Value::String(params.token.clone()));
        }
        if let Some(executor) = &params.executor {
            runner_fields.insert(keys::EXECUTOR.into(), Value::String(executor.clone()));
        }

        let executor = runner_fields
            .get(keys::EXECUTOR)
            .and_then(Value::as_str)
            .map(str::to_string);

        // The binary only writes the image for docker executors; expecting it
        // anywhere else would report drift forever.
        if let (Some(image), Some(exec)) = (&params.default_image, &executor) {
            if is_docker_family(exec) {
                let section = runner_fields
                    .entry(keys::DOCKER.to_string())
                    .or_insert_with(|| Value::Table(Table::new()));
                if let Value::Table(docker) = section {
                    docker.insert(keys::IMAGE.into(), Value::String(image.clone()));
                }
            }
        }

        // Globals: template top level first, global_params on top.
        let mut global = template.global;
        registrar_common::toml_util::deep_merge(&mut global, &params.global_params);
        global.remove(keys::RUNNERS);

        let executor_params = executor
            .as_deref()
            .and_then(|e| runner_fields.get(executor_section(e)))
            .and_then(Value::as_table)
            .cloned()
            .unwrap_or_default();

        let identity = RunnerIdentity {
            token: params.token.clone(),
            url: params.api_url.clone(),
            name: params.name.clone(),
            executor,
            executor_params,
        };

        Ok(DesiredState {
            presence: params.state,
            identity,
            runner_fields,
            global,
            default_global: self.default_global.clone(),
            environ_vars: params.environ_vars.clone(),
            template_file: params.template_file.clone(),
            default_image: params.default_image.clone(),
        })
    }
}

fn load_template(path: &Path) -> Result<TemplateContent> {
    let text = IOUtil::read_if_exists(path)
        .map_err(|e| RegistrarError::io(path, format!("{e:#}")))?
        .ok_or_else(|| {
            RegistrarError::validation(format!(
                "template file '{}' does not exist",
                path.display()
            ))
        })?;

    let parse_error = |message: String| RegistrarError::TemplateParse {
        path: path.to_path_buf(),
        message,
    };

    let mut table = text.parse::<Table>().map_err(|e| parse_error(e.to_string()))?;

    let runner = match table.remove(keys::RUNNERS) {
        None => Table::new(),
        Some(Value::Array(items)) => match items.into_iter().next() {
            None => Table::new(),
            Some(Value::Table(first)) => first,
            Some(_) => {
                return Err(parse_error(
                    "`runners` must be an array of tables ([[runners]])".into(),
                ))
            }
        },
        Some(_) => {
            return Err(parse_error(
                "`runners` must be an array of tables ([[runners]])".into(),
            ))
        }
    };

    Ok(TemplateContent {
        runner,
        global: table,
    })
}
