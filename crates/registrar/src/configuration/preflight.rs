// Preflight checks run before the runner binary is asked to change anything:
// the service must be running and must have written its system id.

use once_cell::sync::Lazy;
use regex::Regex;
use registrar_common::constants::command_line::status;
use registrar_common::tracing::Tracing;
use registrar_common::{RegistrarError, Result};
use registrar_sdk::TraceWriter;
use std::path::Path;

use crate::configuration::registration::RegistrationDriver;

static SERVICE_RUNNING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?m){}", regex::escape(status::RUNNING)))
        .expect("Invalid service running regex")
});

static SERVICE_STOPPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?m){}", regex::escape(status::STOPPED)))
        .expect("Invalid service stopped regex")
});

/// Check that the runner service is up and has initialised itself.
pub async fn check(
    driver: &dyn RegistrationDriver,
    system_id_file: &Path,
    trace: &Tracing,
) -> Result<()> {
    let output = driver.service_status().await?;
    let stdout = output.stdout_text();
    let stderr = output.stderr_text();
    let combined = format!("{stdout}\n{stderr}");

    if SERVICE_STOPPED.is_match(&combined) {
        return Err(RegistrarError::Preflight {
            message: "gitlab-runner service has stopped; start it before registering".into(),
            stdout,
            stderr,
        });
    }
    if !SERVICE_RUNNING.is_match(&combined) {
        return Err(RegistrarError::Preflight {
            message: format!(
                "unable to determine gitlab-runner service status (exit code {})",
                output.exit_code
            ),
            stdout,
            stderr,
        });
    }
    trace.verbose("gitlab-runner service is running");

    if !system_id_file.is_file() {
        return Err(RegistrarError::Preflight {
            message: format!(
                "system id file '{}' is missing; the service creates it on first start",
                system_id_file.display()
            ),
            stdout: String::new(),
            stderr: String::new(),
        });
    }

    Ok(())
}
