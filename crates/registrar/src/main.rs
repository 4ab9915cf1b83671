// Entry point for `gitlab-runner-register`.
//
// Parses the command line, builds a HostContext and runs one reconciliation.
// The outcome (or failure report) is printed to stdout as a single JSON
// object; diagnostics go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use registrar::command_settings::CommandSettings;
use registrar::{FailureReport, GitlabRunnerCli, ReconciliationController};
use registrar_common::constants::return_code;
use registrar_common::HostContext;
use serde::Serialize;
use std::sync::Arc;

fn main() {
    let settings = CommandSettings::parse();

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(return_code::TERMINATED_ERROR);
        }
    };

    let exit_code = runtime.block_on(async move { run(settings).await });

    std::process::exit(exit_code);
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(settings: CommandSettings) -> i32 {
    init_tracing(settings.log_json);

    tracing::info!("gitlab-runner-register starting.");
    tracing::info!("  Version = {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Config  = {}", settings.config.display());

    let params = match settings.to_params() {
        Ok(params) => params,
        Err(e) => {
            tracing::error!("Invalid arguments: {}", e);
            emit(&FailureReport::from_message("arguments", e.to_string()));
            return return_code::INVALID_ARGUMENTS;
        }
    };

    let host_context = HostContext::new(settings.host_paths());
    let driver = Arc::new(GitlabRunnerCli::new(Arc::clone(&host_context)));
    let controller = ReconciliationController::new(Arc::clone(&host_context), driver)
        .with_service_check(!settings.skip_service_check);

    match controller.reconcile(&params).await {
        Ok(outcome) => {
            tracing::info!(
                changed = outcome.changed,
                action = ?outcome.action,
                "{}",
                outcome.msg
            );
            emit(&outcome);
            return_code::SUCCESS
        }
        Err(e) => {
            let report = FailureReport::from_error(&e, |text| host_context.mask(text));
            tracing::error!(kind = e.kind(), "{}", report.msg);
            emit(&report);
            return_code::TERMINATED_ERROR
        }
    }
}

fn emit<T: Serialize>(report: &T) {
    match serde_json::to_string(report) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!("Failed to serialize report: {}", e),
    }
}
