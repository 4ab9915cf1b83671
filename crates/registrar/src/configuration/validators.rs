// Input validators. Everything here runs before the configuration file is
// touched or any process is spawned.

use once_cell::sync::Lazy;
use regex::Regex;
use registrar_common::constants::keys;
use registrar_common::{RegistrarError, Result};
use std::collections::HashSet;
use url::Url;

use crate::configuration::params::{DesiredPresence, EnvironmentVariable, ModuleParams};

static ENV_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("environment name pattern is valid")
});

/// Validate the coordinator URL.
///
/// The URL must be:
/// - A valid URL
/// - Using HTTP or HTTPS scheme
/// - Have a host
pub fn validate_url(url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(RegistrarError::validation("api_url cannot be empty"));
    }

    let url = Url::parse(url_str)
        .map_err(|e| RegistrarError::validation(format!("invalid api_url '{url_str}': {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(RegistrarError::validation(format!(
                "api_url must use HTTP or HTTPS scheme, got '{scheme}'"
            )));
        }
    }

    if url.host_str().is_none() {
        return Err(RegistrarError::validation("api_url must have a host"));
    }

    Ok(())
}

/// Validate a runner name. Names key the entries of the configuration file,
/// so they must be non-empty and fit on one line.
pub fn validate_runner_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RegistrarError::validation("runner name cannot be empty"));
    }
    if name.contains(['\n', '\r']) {
        return Err(RegistrarError::validation(
            "runner name must not contain line breaks",
        ));
    }
    Ok(())
}

pub fn validate_token(token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(RegistrarError::validation("token cannot be empty"));
    }
    Ok(())
}

/// Environment variable names must be unique and usable as process
/// environment keys. Values are not inspected.
pub fn validate_environ_vars(vars: &[EnvironmentVariable]) -> Result<()> {
    let mut seen = HashSet::new();
    for var in vars {
        if !ENV_NAME.is_match(&var.name) {
            return Err(RegistrarError::validation(format!(
                "'{}' is not a valid environment variable name",
                var.name
            )));
        }
        if !seen.insert(var.name.as_str()) {
            return Err(RegistrarError::validation(format!(
                "environment variable '{}' is declared more than once",
                var.name
            )));
        }
    }
    Ok(())
}

/// Global parameters cannot carry runner entries.
pub fn validate_global_params(global_params: &toml::Table) -> Result<()> {
    if global_params.contains_key(keys::RUNNERS) {
        return Err(RegistrarError::validation(
            "global_params must not contain 'runners'; use template_file for runner fields",
        ));
    }
    Ok(())
}

/// Validate a whole parameter set for the requested action.
pub fn validate_params(params: &ModuleParams) -> Result<()> {
    validate_runner_name(&params.name)?;
    validate_environ_vars(&params.environ_vars)?;

    if params.state == DesiredPresence::Absent {
        return Ok(());
    }

    validate_url(&params.api_url)?;
    validate_token(&params.token)?;
    validate_global_params(&params.global_params)?;

    if params.executor.is_none() && params.template_file.is_none() && params.environ_vars.is_empty()
    {
        return Err(RegistrarError::validation(
            "one of executor, template_file or environ_vars is required to register a runner",
        ));
    }

    Ok(())
}
