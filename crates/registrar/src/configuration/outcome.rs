// Reported result of a run, serialized as JSON for the calling automation.

use registrar_common::RegistrarError;
use serde::Serialize;
use std::collections::BTreeSet;

/// What the run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    None,
    Registered,
    Reregistered,
    Unregistered,
}

/// State of the runner after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunnerState {
    Registered,
    Reregistered,
    Unregistered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub changed: bool,
    pub action: Action,
    /// Desired fields that differed from the file.
    pub diff: BTreeSet<String>,
    pub runner_state: RunnerState,
    pub msg: String,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl ReconcileOutcome {
    /// Nothing to do.
    pub fn unchanged(runner_state: RunnerState, msg: impl Into<String>) -> Self {
        Self {
            changed: false,
            action: Action::None,
            diff: BTreeSet::new(),
            runner_state,
            msg: msg.into(),
            warnings: Vec::new(),
            fingerprint: None,
        }
    }

    pub fn changed(action: Action, runner_state: RunnerState, msg: impl Into<String>) -> Self {
        Self {
            changed: true,
            action,
            diff: BTreeSet::new(),
            runner_state,
            msg: msg.into(),
            warnings: Vec::new(),
            fingerprint: None,
        }
    }

    pub fn with_diff(mut self, diff: BTreeSet<String>) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

/// Failure report. Captured output is expected to be masked already.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub failed: bool,
    pub msg: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl FailureReport {
    /// Build a report from a run failure, passing every text through `mask`.
    pub fn from_error(err: &RegistrarError, mask: impl Fn(&str) -> String) -> Self {
        let (stdout, stderr) = match err.captured_output() {
            Some((out, err_out)) => (Some(mask(out)), Some(mask(err_out))),
            None => (None, None),
        };
        Self {
            failed: true,
            msg: mask(&err.to_string()),
            kind: err.kind().to_string(),
            stdout,
            stderr,
        }
    }

    /// Report for a failure outside the reconciliation itself, such as bad
    /// command-line input.
    pub fn from_message(kind: &str, msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            msg: msg.into(),
            kind: kind.to_string(),
            stdout: None,
            stderr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_lowercase_action() {
        let outcome = ReconcileOutcome::changed(
            Action::Reregistered,
            RunnerState::Reregistered,
            "Reregistering Runner due to Token mismatch",
        )
        .with_diff(BTreeSet::from(["token".to_string()]))
        .with_warnings(vec!["other runner 'host2' found in config".into()])
        .with_fingerprint("abc");

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["changed"], true);
        assert_eq!(json["action"], "reregistered");
        assert_eq!(json["runner_state"], "Reregistered");
        assert_eq!(json["diff"], serde_json::json!(["token"]));
        assert_eq!(json["fingerprint"], "abc");
    }

    #[test]
    fn unchanged_outcome_omits_fingerprint() {
        let json =
            serde_json::to_value(ReconcileOutcome::unchanged(RunnerState::Unregistered, "absent"))
                .unwrap();
        assert_eq!(json["changed"], false);
        assert_eq!(json["action"], "none");
        assert!(json.get("fingerprint").is_none());
    }

    #[test]
    fn failure_report_masks_captured_output() {
        let err = RegistrarError::ProcessInvocation {
            operation: "register".into(),
            message: "exit code 1".into(),
            exit_code: Some(1),
            stdout: "using glrt-secret".into(),
            stderr: "ERROR: glrt-secret rejected".into(),
        };
        let report = FailureReport::from_error(&err, |s| s.replace("glrt-secret", "***"));
        assert!(report.failed);
        assert_eq!(report.kind, "process_invocation");
        assert_eq!(report.stdout.as_deref(), Some("using ***"));
        assert_eq!(report.stderr.as_deref(), Some("ERROR: *** rejected"));

        let json = serde_json::to_value(FailureReport::from_error(
            &RegistrarError::validation("bad"),
            str::to_string,
        ))
        .unwrap();
        assert!(json.get("stdout").is_none());
        assert_eq!(json["failed"], true);
    }
}
