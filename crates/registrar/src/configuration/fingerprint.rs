// Fingerprint and diff engine.
//
// A fingerprint condenses the fields that define a registration (token, url,
// name, executor and the executor's settings) into a stable token. The diff
// compares desired fields against the on-disk entry and only ever looks at
// keys the caller asked for, so keys the runner service adds after
// registration are never mistaken for drift.

use registrar_common::constants::keys;
use registrar_common::{ConfigDocument, RegistrarError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use toml::{Table, Value};

use crate::configuration::desired_state::{executor_section, DesiredState, RunnerIdentity};

/// Opaque identity token of a registration intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of `identity` as seen through `desired`.
///
/// The executor only counts when `desired` names one. Executor settings are
/// restricted to the keys `desired` specifies, which
/// makes the fingerprint of an on-disk identity comparable with the desired
/// one even after the service added settings of its own. Key order never
/// affects the result.
pub fn fingerprint(identity: &RunnerIdentity, desired: &DesiredState) -> Fingerprint {
    let params = project(&identity.executor_params, &desired.identity.executor_params);

    let mut canonical = String::new();
    write_str(&mut canonical, &identity.token);
    write_str(&mut canonical, &identity.url);
    write_str(&mut canonical, &identity.name);
    // An executor chosen through the environment is not known up front.
    match (&desired.identity.executor, &identity.executor) {
        (None, _) => canonical.push('-'),
        (Some(_), Some(executor)) => write_str(&mut canonical, executor),
        (Some(_), None) => canonical.push('n'),
    }
    write_table(&mut canonical, &params);

    let digest = Sha256::digest(canonical.as_bytes());
    Fingerprint(hex::encode(digest))
}

// ---------------------------------------------------------------------------
// Current state
// ---------------------------------------------------------------------------

/// What the configuration file says about the desired runner.
#[derive(Debug, Clone, Default)]
pub struct CurrentState {
    /// The entry named like the desired runner, if any.
    pub entry: Option<Table>,
    /// Identity recovered from `entry`.
    pub identity: Option<RunnerIdentity>,
    /// Global section of the document.
    pub global: Table,
}

impl CurrentState {
    /// Inspect `document` for the runner called `name`.
    ///
    /// Fails with `AmbiguousState` when the name is used by more than one
    /// entry or the entry's token or url cannot be read.
    pub fn inspect(document: &ConfigDocument, name: &str) -> Result<Self> {
        let global = document.global();

        let count = document.count_runners_named(name);
        if count > 1 {
            return Err(RegistrarError::AmbiguousState {
                name: name.to_string(),
                reason: format!("{count} entries share this name"),
            });
        }

        let Some(entry) = document.find_runner(name) else {
            return Ok(Self {
                entry: None,
                identity: None,
                global,
            });
        };

        let identity = recover_identity(entry, name)?;
        Ok(Self {
            entry: Some(entry.clone()),
            identity: Some(identity),
            global,
        })
    }

    pub fn is_present(&self) -> bool {
        self.entry.is_some()
    }

    /// Token of the on-disk entry.
    pub fn token(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.token.as_str())
    }

    /// Coordinator URL of the on-disk entry.
    pub fn url(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.url.as_str())
    }
}

fn recover_identity(entry: &Table, name: &str) -> Result<RunnerIdentity> {
    let required = |key: &str| -> Result<String> {
        match entry.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::String(_)) => Err(RegistrarError::AmbiguousState {
                name: name.to_string(),
                reason: format!("'{key}' is empty"),
            }),
            Some(other) => Err(RegistrarError::AmbiguousState {
                name: name.to_string(),
                reason: format!("'{key}' is a {} instead of a string", other.type_str()),
            }),
            None => Err(RegistrarError::AmbiguousState {
                name: name.to_string(),
                reason: format!("'{key}' is missing"),
            }),
        }
    };

    let token = required(keys::TOKEN)?;
    let url = required(keys::URL)?;
    let executor = entry
        .get(keys::EXECUTOR)
        .and_then(Value::as_str)
        .map(str::to_string);
    let executor_params = executor
        .as_deref()
        .and_then(|e| entry.get(executor_section(e)))
        .and_then(Value::as_table)
        .cloned()
        .unwrap_or_default();

    Ok(RunnerIdentity {
        token,
        url,
        name: name.to_string(),
        executor,
        executor_params,
    })
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Names of desired fields whose on-disk value differs.
///
/// Runner fields are reported by their dotted path inside the entry
/// (`docker.image`), global keys with a `global.` prefix. Keys present on
/// disk but not desired are not differences.
pub fn diff(current: &CurrentState, desired: &DesiredState) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();
    let empty = Table::new();
    compare_leaves(
        "",
        &desired.runner_fields,
        current.entry.as_ref().unwrap_or(&empty),
        &mut changed,
    );
    compare_leaves("global.", &desired.global, &current.global, &mut changed);
    changed
}

/// Identity fields that differ between the on-disk entry and the desired
/// state. Empty when no entry exists.
pub fn identity_changes(current: &CurrentState, desired: &DesiredState) -> Vec<&'static str> {
    let Some(existing) = &current.identity else {
        return Vec::new();
    };
    let wanted = &desired.identity;

    let mut changes = Vec::new();
    if existing.token != wanted.token {
        changes.push(keys::TOKEN);
    }
    if existing.url != wanted.url {
        changes.push(keys::URL);
    }
    if wanted.executor.is_some() && existing.executor != wanted.executor {
        changes.push(keys::EXECUTOR);
    }
    if project(&existing.executor_params, &wanted.executor_params) != wanted.executor_params {
        changes.push("executor settings");
    }
    changes
}

/// Whether the runner has to go through registration again.
///
/// Any difference counts: identity fields always do, and no other field is
/// known to be safe to patch while the runner stays registered.
pub fn needs_reregistration(current: &CurrentState, desired: &DesiredState, recreate: bool) -> bool {
    if recreate || !current.is_present() {
        return true;
    }
    if let Some(identity) = &current.identity {
        if fingerprint(identity, desired) != fingerprint(&desired.identity, desired) {
            return true;
        }
    }
    !diff(current, desired).is_empty()
}

fn compare_leaves(prefix: &str, desired: &Table, current: &Table, out: &mut BTreeSet<String>) {
    for (key, wanted) in desired {
        let path = format!("{prefix}{key}");
        match (wanted, current.get(key)) {
            (Value::Table(nested), Some(Value::Table(existing))) => {
                compare_leaves(&format!("{path}."), nested, existing, out);
            }
            (Value::Table(nested), _) if !nested.is_empty() => {
                compare_leaves(&format!("{path}."), nested, &Table::new(), out);
            }
            (wanted, Some(existing)) if wanted == existing => {}
            _ => {
                out.insert(path);
            }
        }
    }
}

/// Restrict `value` to the keys present in `shape`, recursing into tables.
fn project(value: &Table, shape: &Table) -> Table {
    let mut projected = Table::new();
    for (key, wanted) in shape {
        match (wanted, value.get(key)) {
            (Value::Table(nested), Some(Value::Table(existing))) => {
                projected.insert(key.clone(), Value::Table(project(existing, nested)));
            }
            (_, Some(existing)) => {
                projected.insert(key.clone(), existing.clone());
            }
            (_, None) => {}
        }
    }
    projected
}

// ---------------------------------------------------------------------------
// Canonical encoding
// ---------------------------------------------------------------------------

fn write_str(out: &mut String, s: &str) {
    out.push_str(&format!("s{}:{}", s.len(), s));
}

fn write_table(out: &mut String, table: &Table) {
    let mut entries: Vec<_> = table.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    out.push_str(&format!("t{}{{", entries.len()));
    for (key, value) in entries {
        write_str(out, key);
        write_value(out, value);
    }
    out.push('}');
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => write_str(out, s),
        Value::Integer(i) => out.push_str(&format!("i{i};")),
        Value::Float(f) => out.push_str(&format!("f{:x};", f.to_bits())),
        Value::Boolean(b) => out.push_str(if *b { "b1;" } else { "b0;" }),
        Value::Datetime(d) => {
            out.push('d');
            write_str(out, &d.to_string());
        }
        Value::Array(items) => {
            out.push_str(&format!("a{}[", items.len()));
            for item in items {
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Table(t) => write_table(out, t),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::desired_state::DesiredStateBuilder;
    use crate::configuration::params::ModuleParams;

    const CONFIG: &str = r#"concurrent = 4
check_interval = 0

[[runners]]
  name = "host1"
  url = "https://gitlab.example.com"
  id = 42
  token = "glrt-host1"
  token_obtained_at = 2024-01-01T00:00:00Z
  executor = "docker"
  [runners.docker]
    image = "alpine:latest"
    privileged = false
    volumes = ["/cache"]
"#;

    fn params() -> ModuleParams {
        ModuleParams {
            api_url: "https://gitlab.example.com".into(),
            token: "glrt-host1".into(),
            name: "host1".into(),
            executor: Some("docker".into()),
            default_image: Some("alpine:latest".into()),
            ..ModuleParams::default()
        }
    }

    fn desired(p: &ModuleParams) -> DesiredState {
        DesiredStateBuilder::new().build(p).unwrap()
    }

    fn current(text: &str) -> CurrentState {
        CurrentState::inspect(&ConfigDocument::parse(text).unwrap(), "host1").unwrap()
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_independent() {
        let a = desired(&params());
        let mut reordered = a.clone();
        let mut params_table = Table::new();
        params_table.insert("privileged".into(), Value::Boolean(false));
        params_table.insert("image".into(), Value::String("alpine:latest".into()));
        reordered.identity.executor_params = params_table.clone();

        let mut forward = a.clone();
        let mut table = Table::new();
        table.insert("image".into(), Value::String("alpine:latest".into()));
        table.insert("privileged".into(), Value::Boolean(false));
        forward.identity.executor_params = table;

        assert_eq!(
            fingerprint(&forward.identity, &forward),
            fingerprint(&reordered.identity, &reordered)
        );
        assert_eq!(fingerprint(&a.identity, &a), fingerprint(&a.identity, &a));
        assert_eq!(fingerprint(&a.identity, &a).as_str().len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_token() {
        let a = desired(&params());
        let mut p = params();
        p.token = "glrt-other".into();
        let b = desired(&p);
        assert_ne!(fingerprint(&a.identity, &a), fingerprint(&b.identity, &b));
    }

    #[test]
    fn on_disk_fingerprint_ignores_service_settings() {
        let d = desired(&params());
        let c = current(CONFIG);
        let identity = c.identity.as_ref().unwrap();
        assert_eq!(identity.executor_params["volumes"].as_array().map(Vec::len), Some(1));
        assert_eq!(fingerprint(identity, &d), fingerprint(&d.identity, &d));
    }

    #[test]
    fn matching_entry_has_no_diff() {
        let d = desired(&params());
        let c = current(CONFIG);
        assert!(diff(&c, &d).is_empty());
        assert!(identity_changes(&c, &d).is_empty());
        assert!(!needs_reregistration(&c, &d, false));
    }

    #[test]
    fn extra_keys_on_disk_are_not_drift() {
        let d = desired(&params());
        let mutated = CONFIG.replace(
            "  executor = \"docker\"\n",
            "  executor = \"docker\"\n  request_concurrency = 3\n  [runners.cache]\n    MaxUploadedArchiveSize = 0\n",
        );
        let c = current(&mutated);
        assert!(diff(&c, &d).is_empty());
        assert!(!needs_reregistration(&c, &d, false));
    }

    #[test]
    fn executor_from_environment_matches_any_on_disk_executor() {
        let mut p = params();
        p.executor = None;
        p.default_image = None;
        let d = desired(&p);
        let c = current(CONFIG);
        assert!(identity_changes(&c, &d).is_empty());
        assert!(!needs_reregistration(&c, &d, false));
    }

    #[test]
    fn recreate_always_reregisters() {
        let d = desired(&params());
        assert!(needs_reregistration(&current(CONFIG), &d, true));
    }

    #[test]
    fn absent_entry_needs_registration_and_reports_desired_fields() {
        let d = desired(&params());
        let c = current("concurrent = 1\n");
        assert!(!c.is_present());
        assert!(needs_reregistration(&c, &d, false));
        let changed = diff(&c, &d);
        assert!(changed.contains("token"));
        assert!(changed.contains("docker.image"));
        assert!(identity_changes(&c, &d).is_empty());
    }

    #[test]
    fn token_change_is_identity_change() {
        let mut p = params();
        p.token = "glrt-rotated".into();
        let d = desired(&p);
        let c = current(CONFIG);
        assert_eq!(identity_changes(&c, &d), vec!["token"]);
        assert_eq!(diff(&c, &d), BTreeSet::from(["token".to_string()]));
        assert!(needs_reregistration(&c, &d, false));
    }

    #[test]
    fn executor_setting_change_is_reported_by_path() {
        let mut p = params();
        p.default_image = Some("ruby:3".into());
        let d = desired(&p);
        let c = current(CONFIG);
        assert_eq!(diff(&c, &d), BTreeSet::from(["docker.image".to_string()]));
        assert_eq!(identity_changes(&c, &d), vec!["executor settings"]);
        assert!(needs_reregistration(&c, &d, false));
    }

    #[test]
    fn global_drift_is_reported_with_prefix() {
        let mut p = params();
        p.global_params = "concurrent = 10\ncheck_interval = 0\n".parse().unwrap();
        let d = desired(&p);
        let c = current(CONFIG);
        assert_eq!(diff(&c, &d), BTreeSet::from(["global.concurrent".to_string()]));
        assert!(needs_reregistration(&c, &d, false));
    }

    #[test]
    fn default_globals_never_count_as_drift() {
        let d = desired(&params());
        assert!(!d.default_global.is_empty());
        let c = current(CONFIG);
        assert!(diff(&c, &d).is_empty());
    }

    #[test]
    fn missing_token_is_ambiguous() {
        let doc = ConfigDocument::parse(
            "[[runners]]\nname = \"host1\"\nurl = \"https://gitlab.example.com\"\n",
        )
        .unwrap();
        let err = CurrentState::inspect(&doc, "host1").unwrap_err();
        assert!(matches!(err, RegistrarError::AmbiguousState { .. }));
        assert!(err.to_string().contains("'token' is missing"));
    }

    #[test]
    fn non_string_url_is_ambiguous() {
        let doc = ConfigDocument::parse(
            "[[runners]]\nname = \"host1\"\nurl = 5\ntoken = \"glrt-x\"\n",
        )
        .unwrap();
        let err = CurrentState::inspect(&doc, "host1").unwrap_err();
        assert!(err.to_string().contains("'url' is a integer"));
    }

    #[test]
    fn duplicate_names_are_ambiguous() {
        let doc = ConfigDocument::parse(
            "[[runners]]\nname = \"host1\"\nurl = \"u\"\ntoken = \"a\"\n\n[[runners]]\nname = \"host1\"\nurl = \"u\"\ntoken = \"b\"\n",
        )
        .unwrap();
        let err = CurrentState::inspect(&doc, "host1").unwrap_err();
        assert!(err.to_string().contains("2 entries share this name"));
    }
}
