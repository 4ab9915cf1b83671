// ReconciliationController: decides what a run has to do and carries it out.
//
//   ABSENT         -> register -> merge entry -> DONE (changed)
//   PRESENT_MATCH  -> DONE (unchanged, no process, no write)
//   PRESENT_DRIFT  -> unregister -> remove entry -> ABSENT
//   state=absent   -> unregister -> remove entry -> DONE (changed)
//
// The configuration file is written once, at the end, and only after every
// invocation of the runner binary succeeded.

use registrar_common::tracing::Tracing;
use registrar_common::{
    ConfigDocument, HostContext, RegistrarError, Result, WellKnownConfigFile,
};
use registrar_sdk::TraceWriter;
use std::path::Path;
use std::sync::Arc;

use crate::configuration::desired_state::{DesiredState, DesiredStateBuilder};
use crate::configuration::fingerprint::{self, CurrentState};
use crate::configuration::outcome::{Action, ReconcileOutcome, RunnerState};
use crate::configuration::params::{DesiredPresence, ModuleParams};
use crate::configuration::preflight;
use crate::configuration::registration::{RegistrationDriver, RegistrationRequest};
use crate::configuration::validators;

/// Where the desired runner stands before anything is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Absent,
    PresentMatch,
    PresentDrift,
}

/// Classify the on-disk state against the desired one.
pub fn classify(current: &CurrentState, desired: &DesiredState, recreate: bool) -> SlotState {
    if !current.is_present() {
        SlotState::Absent
    } else if fingerprint::needs_reregistration(current, desired, recreate) {
        SlotState::PresentDrift
    } else {
        SlotState::PresentMatch
    }
}

pub struct ReconciliationController {
    context: Arc<HostContext>,
    driver: Arc<dyn RegistrationDriver>,
    builder: DesiredStateBuilder,
    trace: Tracing,
    service_check: bool,
}

impl ReconciliationController {
    pub fn new(context: Arc<HostContext>, driver: Arc<dyn RegistrationDriver>) -> Self {
        let trace = context.get_trace("ReconciliationController");
        Self {
            context,
            driver,
            builder: DesiredStateBuilder::new(),
            trace,
            service_check: true,
        }
    }

    /// Enable or disable the service preflight checks.
    pub fn with_service_check(mut self, enabled: bool) -> Self {
        self.service_check = enabled;
        self
    }

    /// Bring the runner named in `params` to the requested state.
    pub async fn reconcile(&self, params: &ModuleParams) -> Result<ReconcileOutcome> {
        validators::validate_params(params)?;
        let desired = self.builder.build(params)?;
        self.context.add_secret(&params.token);

        let config_path = self.context.get_config_file(WellKnownConfigFile::RunnerConfig);
        self.trace
            .info(&format!("Loading configuration from '{}'", config_path.display()));
        let mut document = ConfigDocument::load(&config_path)?;
        if !document.existed() {
            self.trace.info("Configuration file does not exist yet, starting empty");
        }

        let warnings = foreign_runner_warnings(&document, &params.name);
        for warning in &warnings {
            self.trace.warning(warning);
        }

        let result = match desired.presence {
            DesiredPresence::Present => {
                self.ensure_present(&desired, params.recreate, &mut document, &config_path, warnings)
                    .await
            }
            DesiredPresence::Absent => {
                self.ensure_absent(&desired, params.recreate, &mut document, &config_path, warnings)
                    .await
            }
        };

        match &result {
            Ok(outcome) => self.trace.verbose_object(outcome),
            Err(e) => self.trace.error_err(e),
        }
        result
    }

    async fn ensure_present(
        &self,
        desired: &DesiredState,
        recreate: bool,
        document: &mut ConfigDocument,
        config_path: &Path,
        mut warnings: Vec<String>,
    ) -> Result<ReconcileOutcome> {
        let name = desired.identity.name.as_str();

        let (current, discarded) = match self.inspect(document, name, recreate, &mut warnings)? {
            Inspection::Readable(current) => (current, false),
            Inspection::Discarded => (CurrentState::inspect(document, name)?, true),
        };

        let desired_fingerprint = fingerprint::fingerprint(&desired.identity, desired).to_string();
        let changed_fields = fingerprint::diff(&current, desired);
        let state = classify(&current, desired, recreate);
        self.trace.verbose(&format!("Runner '{name}' is {state:?}"));

        let (action, msg) = match state {
            SlotState::PresentMatch => {
                self.trace.info(&format!("Runner '{name}' is already registered"));
                return Ok(ReconcileOutcome::unchanged(
                    RunnerState::Registered,
                    format!("Runner '{name}' is already registered"),
                )
                .with_warnings(warnings)
                .with_fingerprint(desired_fingerprint));
            }
            SlotState::Absent if discarded => (
                Action::Reregistered,
                "Force reregistering Runner due to recreate option".to_string(),
            ),
            SlotState::Absent => (Action::Registered, "Init registering Runner".to_string()),
            SlotState::PresentDrift => {
                let msg = reregistration_reason(&current, desired, recreate, &changed_fields);
                self.preflight().await?;
                self.trace.info(&msg);

                let (url, token) = match (current.url(), current.token()) {
                    (Some(url), Some(token)) => (url.to_string(), token.to_string()),
                    _ => {
                        return Err(RegistrarError::AmbiguousState {
                            name: name.to_string(),
                            reason: "entry has no readable identity".into(),
                        })
                    }
                };
                self.driver.unregister(document, &url, &token).await?;
                document.remove_runner(name);
                (Action::Reregistered, msg)
            }
        };

        if state == SlotState::Absent {
            self.preflight().await?;
            self.trace.info(&msg);
        }

        if desired.global.is_empty() {
            document.seed_global(&desired.default_global);
        }
        document.merge_global(&desired.global);

        let request = RegistrationRequest::from_desired(desired);
        let entry = self.driver.register(document, &request).await?;
        document.upsert_runner(name, &entry);
        document.upsert_runner(name, &desired.runner_fields);

        if document.write(config_path)? {
            self.trace
                .info(&format!("Configuration written to '{}'", config_path.display()));
        }

        let runner_state = match action {
            Action::Reregistered => RunnerState::Reregistered,
            _ => RunnerState::Registered,
        };
        Ok(ReconcileOutcome::changed(action, runner_state, msg)
            .with_diff(changed_fields)
            .with_warnings(warnings)
            .with_fingerprint(desired_fingerprint))
    }

    async fn ensure_absent(
        &self,
        desired: &DesiredState,
        recreate: bool,
        document: &mut ConfigDocument,
        config_path: &Path,
        mut warnings: Vec<String>,
    ) -> Result<ReconcileOutcome> {
        let name = desired.identity.name.as_str();

        let current = match self.inspect(document, name, recreate, &mut warnings)? {
            Inspection::Readable(current) => current,
            Inspection::Discarded => {
                document.write(config_path)?;
                return Ok(ReconcileOutcome::changed(
                    Action::Unregistered,
                    RunnerState::Unregistered,
                    format!("Removed unreadable entry for runner '{name}'"),
                )
                .with_warnings(warnings));
            }
        };

        let (Some(url), Some(token)) = (current.url(), current.token()) else {
            self.trace.info(&format!("Runner '{name}' is not registered"));
            return Ok(ReconcileOutcome::unchanged(
                RunnerState::Unregistered,
                format!("Runner '{name}' is not registered"),
            )
            .with_warnings(warnings));
        };

        self.preflight().await?;
        self.trace.info("Unregistering Runner");
        self.driver.unregister(document, url, token).await?;

        document.remove_runner(name);
        document.write(config_path)?;

        Ok(ReconcileOutcome::changed(
            Action::Unregistered,
            RunnerState::Unregistered,
            "Unregistering Runner",
        )
        .with_warnings(warnings))
    }

    /// Read the current entry. With `recreate`, an entry whose identity cannot
    /// be read is dropped locally; its token is unusable for a remote
    /// unregister.
    fn inspect(
        &self,
        document: &mut ConfigDocument,
        name: &str,
        recreate: bool,
        warnings: &mut Vec<String>,
    ) -> Result<Inspection> {
        match CurrentState::inspect(document, name) {
            Ok(current) => {
                if let Some(token) = current.token() {
                    self.context.add_secret(token);
                }
                Ok(Inspection::Readable(current))
            }
            Err(RegistrarError::AmbiguousState { name, reason }) if recreate => {
                let warning = format!(
                    "discarding unreadable entry for runner '{name}' ({reason}) without unregistering it"
                );
                self.trace.warning(&warning);
                warnings.push(warning);
                document.remove_runner(&name);
                Ok(Inspection::Discarded)
            }
            Err(e) => Err(e),
        }
    }

    async fn preflight(&self) -> Result<()> {
        if !self.service_check {
            self.trace.verbose("Service check skipped");
            return Ok(());
        }
        let system_id = self.context.get_config_file(WellKnownConfigFile::SystemId);
        preflight::check(self.driver.as_ref(), &system_id, &self.trace).await
    }
}

enum Inspection {
    Readable(CurrentState),
    Discarded,
}

fn reregistration_reason(
    current: &CurrentState,
    desired: &DesiredState,
    recreate: bool,
    changed_fields: &std::collections::BTreeSet<String>,
) -> String {
    if recreate {
        return "Force reregistering Runner due to recreate option".to_string();
    }
    let identity = fingerprint::identity_changes(current, desired);
    if identity.contains(&"token") {
        return "Reregistering Runner due to Token mismatch".to_string();
    }
    if !identity.is_empty() {
        return format!("Reregistering Runner due to changed {}", identity.join(", "));
    }
    let fields: Vec<_> = changed_fields.iter().map(String::as_str).collect();
    format!(
        "Reregistering Runner due to configuration drift in {}",
        fields.join(", ")
    )
}

fn foreign_runner_warnings(document: &ConfigDocument, name: &str) -> Vec<String> {
    document
        .runner_names()
        .into_iter()
        .filter(|other| other != name)
        .map(|other| {
            format!("config file also holds runner '{other}', which this run does not manage")
        })
        .collect()
}
