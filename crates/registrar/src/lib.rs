// registrar: reconciliation engine behind `gitlab-runner-register`.
// Depends on `registrar-sdk` and `registrar-common`.
//
// Architecture:
//   main → CommandSettings → ModuleParams
//        → ReconciliationController::reconcile
//            → DesiredStateBuilder → CurrentState / diff / fingerprint
//            → RegistrationDriver (gitlab-runner CLI) → ConfigDocument::write

pub mod command_settings;
pub mod configuration;

pub use configuration::outcome::{Action, FailureReport, ReconcileOutcome, RunnerState};
pub use configuration::params::{DesiredPresence, EnvironmentVariable, ModuleParams};
pub use configuration::reconciler::ReconciliationController;
pub use configuration::registration::{GitlabRunnerCli, RegistrationDriver, RegistrationRequest};
