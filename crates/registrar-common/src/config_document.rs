// ConfigDocument: the runner configuration file as a tagged-value tree.
//
// The file is shared with the runner service, which adds and rewrites keys on
// its own. The document therefore keeps the bytes it was loaded from and only
// ever replaces the file when the in-memory tree differs from what was loaded.

use crate::constants::keys;
use crate::error::{RegistrarError, Result};
use crate::toml_util;

use registrar_sdk::IOUtil;
use std::path::Path;
use toml::{Table, Value};

/// Structured view of the runner configuration file.
///
/// Top-level keys other than `runners` form the global section. `runners` is
/// an ordered array of tables, one per runner entry, identified by `name`.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    /// Bytes the document was loaded from; `None` when the file did not exist.
    original: Option<String>,
    /// Tree as loaded, used to decide whether anything changed.
    pristine: Table,
    table: Table,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl ConfigDocument {
    /// A document for a file that does not exist yet.
    pub fn empty() -> Self {
        Self {
            original: None,
            pristine: Table::new(),
            table: Table::new(),
        }
    }

    /// Load the document at `path`.
    ///
    /// A missing file yields an empty document; malformed TOML, or a `runners`
    /// key that is not an array of tables, is a `ConfigParse` error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = IOUtil::read_if_exists(path).map_err(|e| RegistrarError::io(path, format!("{e:#}")))?;

        match content {
            None => Ok(Self::empty()),
            Some(text) => Self::parse(&text).map_err(|message| RegistrarError::ConfigParse {
                path: path.to_path_buf(),
                message,
            }),
        }
    }

    /// Parse TOML text into a document, remembering the text for round trips.
    ///
    /// The error is a human-readable message including the parse location.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let table = text.parse::<Table>().map_err(|e| e.to_string())?;

        if let Some(runners) = table.get(keys::RUNNERS) {
            let valid = runners
                .as_array()
                .map(|items| items.iter().all(Value::is_table))
                .unwrap_or(false);
            if !valid {
                return Err("`runners` must be an array of tables ([[runners]])".to_string());
            }
        }

        Ok(Self {
            original: Some(text.to_string()),
            pristine: table.clone(),
            table,
        })
    }

    /// True when the document was loaded from an existing file.
    pub fn existed(&self) -> bool {
        self.original.is_some()
    }

    /// The whole tree.
    pub fn as_table(&self) -> &Table {
        &self.table
    }

    // -----------------------------------------------------------------------
    // Global section
    // -----------------------------------------------------------------------

    /// Top-level keys other than `runners`, in document order.
    pub fn global(&self) -> Table {
        self.table
            .iter()
            .filter(|(k, _)| k.as_str() != keys::RUNNERS)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Overwrite the global keys present in `params`; other keys are kept.
    pub fn merge_global(&mut self, params: &Table) {
        let mut filtered = params.clone();
        filtered.remove(keys::RUNNERS);
        toml_util::deep_merge(&mut self.table, &filtered);
    }

    /// Add global keys from `defaults` that the document does not have yet.
    pub fn seed_global(&mut self, defaults: &Table) {
        let mut filtered = defaults.clone();
        filtered.remove(keys::RUNNERS);
        toml_util::fill_missing(&mut self.table, &filtered);
    }

    // -----------------------------------------------------------------------
    // Runner entries
    // -----------------------------------------------------------------------

    /// All runner entries in document order.
    pub fn runners(&self) -> Vec<&Table> {
        self.table
            .get(keys::RUNNERS)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_table).collect())
            .unwrap_or_default()
    }

    /// Names of all runner entries, in document order. Entries without a
    /// readable name are skipped.
    pub fn runner_names(&self) -> Vec<String> {
        self.runners()
            .into_iter()
            .filter_map(|r| r.get(keys::NAME).and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// First entry named `name`.
    pub fn find_runner(&self, name: &str) -> Option<&Table> {
        self.runners().into_iter().find(|r| entry_has_name(r, name))
    }

    /// Number of entries named `name`. More than one breaks the uniqueness
    /// invariant and makes the entry's identity ambiguous.
    pub fn count_runners_named(&self, name: &str) -> usize {
        self.runners()
            .into_iter()
            .filter(|r| entry_has_name(r, name))
            .count()
    }

    /// Merge `fields` into the entry named `name`, or append a new entry.
    ///
    /// Only keys present in `fields` are overwritten (nested tables key by
    /// key); keys the entry already has and `fields` does not mention are kept.
    pub fn upsert_runner(&mut self, name: &str, fields: &Table) {
        if let Some(entry) = self
            .table
            .get_mut(keys::RUNNERS)
            .and_then(Value::as_array_mut)
            .and_then(|runners| {
                runners
                    .iter_mut()
                    .filter_map(Value::as_table_mut)
                    .find(|r| entry_has_name(r, name))
            })
        {
            toml_util::deep_merge(entry, fields);
            entry.insert(keys::NAME.to_string(), Value::String(name.to_string()));
            return;
        }

        let mut entry = Table::new();
        entry.insert(keys::NAME.to_string(), Value::String(name.to_string()));
        toml_util::deep_merge(&mut entry, fields);

        match self.table.get_mut(keys::RUNNERS).and_then(Value::as_array_mut) {
            Some(runners) => runners.push(Value::Table(entry)),
            None => {
                self.table.insert(
                    keys::RUNNERS.to_string(),
                    Value::Array(vec![Value::Table(entry)]),
                );
            }
        }
    }

    /// Remove every entry named `name`. Returns whether anything was removed.
    pub fn remove_runner(&mut self, name: &str) -> bool {
        let Some(runners) = self
            .table
            .get_mut(keys::RUNNERS)
            .and_then(Value::as_array_mut)
        else {
            return false;
        };

        let before = runners.len();
        runners.retain(|r| !r.as_table().map(|t| entry_has_name(t, name)).unwrap_or(false));
        let removed = runners.len() != before;

        if runners.is_empty() {
            self.table.remove(keys::RUNNERS);
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Whether the tree differs from what was loaded.
    pub fn is_modified(&self) -> bool {
        self.table != self.pristine
    }

    /// Serialize the document. An unmodified document renders as the exact
    /// bytes it was loaded from.
    pub fn render(&self) -> Result<String> {
        if !self.is_modified() {
            if let Some(original) = &self.original {
                return Ok(original.clone());
            }
        }
        toml::to_string(&self.table)
            .map_err(|e| RegistrarError::validation(format!("config document cannot be serialized: {e}")))
    }

    /// Persist the document atomically if it changed since it was loaded.
    ///
    /// Returns `true` when the file was written. Afterwards the written state
    /// becomes the new baseline.
    pub fn write(&mut self, path: &Path) -> Result<bool> {
        if !self.is_modified() {
            return Ok(false);
        }

        let rendered = self.render()?;
        if self.original.as_deref() == Some(rendered.as_str()) {
            self.pristine = self.table.clone();
            return Ok(false);
        }

        IOUtil::atomic_write(path, rendered.as_bytes())
            .map_err(|e| RegistrarError::io(path, format!("{e:#}")))?;

        self.original = Some(rendered);
        self.pristine = self.table.clone();
        Ok(true)
    }
}

fn entry_has_name(entry: &Table, name: &str) -> bool {
    entry.get(keys::NAME).and_then(Value::as_str) == Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"# managed by gitlab-runner
concurrent = 4
check_interval = 0
connection_max_age = "15m0s"

[session_server]
  session_timeout = 1800

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

[[runners]]
  name = "host2"
  url = "https://gitlab.example.com"
  token = "glrt-host2"
  executor = "shell"
"#;

    fn fields(text: &str) -> Table {
        text.parse().unwrap()
    }

    #[test]
    fn load_missing_file_is_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let doc = ConfigDocument::load(&dir.path().join("config.toml")).unwrap();
        assert!(!doc.existed());
        assert!(doc.runners().is_empty());
        assert!(doc.global().is_empty());
    }

    #[test]
    fn load_malformed_file_is_config_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "concurrent = \n[[runners]\n").unwrap();
        let err = ConfigDocument::load(&path).unwrap_err();
        assert!(matches!(err, RegistrarError::ConfigParse { .. }));
        assert!(err.to_string().contains("line"));
    }

    #[test]
    fn runners_must_be_array_of_tables() {
        assert!(ConfigDocument::parse("runners = \"nope\"\n").is_err());
        assert!(ConfigDocument::parse("runners = [1, 2]\n").is_err());
    }

    #[test]
    fn global_excludes_runners_and_keeps_order() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        let keys: Vec<_> = doc.global().keys().cloned().collect();
        assert_eq!(
            keys,
            vec!["concurrent", "check_interval", "connection_max_age", "session_server"]
        );
    }

    #[test]
    fn find_runner_by_name() {
        let doc = ConfigDocument::parse(SAMPLE).unwrap();
        let entry = doc.find_runner("host2").unwrap();
        assert_eq!(entry["executor"].as_str(), Some("shell"));
        assert!(doc.find_runner("host3").is_none());
        assert_eq!(doc.runner_names(), vec!["host1", "host2"]);
        assert_eq!(doc.count_runners_named("host1"), 1);
    }

    #[test]
    fn upsert_existing_keeps_service_managed_keys_and_position() {
        let mut doc = ConfigDocument::parse(SAMPLE).unwrap();
        doc.upsert_runner("host1", &fields("executor = \"docker\"\n[docker]\nimage = \"ruby:3\"\n"));

        let entry = doc.find_runner("host1").unwrap();
        assert_eq!(entry["docker"]["image"].as_str(), Some("ruby:3"));
        assert_eq!(entry["docker"]["privileged"].as_bool(), Some(false));
        assert_eq!(entry["id"].as_integer(), Some(42));
        assert!(entry.contains_key("token_obtained_at"));
        assert_eq!(doc.runner_names(), vec!["host1", "host2"]);
        assert!(doc.is_modified());
    }

    #[test]
    fn upsert_absent_appends_at_end() {
        let mut doc = ConfigDocument::parse(SAMPLE).unwrap();
        doc.upsert_runner("host3", &fields("token = \"glrt-3\"\n"));
        assert_eq!(doc.runner_names(), vec!["host1", "host2", "host3"]);
        assert_eq!(doc.find_runner("host3").unwrap()["token"].as_str(), Some("glrt-3"));
    }

    #[test]
    fn upsert_into_empty_document_creates_runners_array() {
        let mut doc = ConfigDocument::empty();
        doc.upsert_runner("host1", &fields("url = \"https://gitlab.example.com\"\n"));
        let rendered = doc.render().unwrap();
        assert!(rendered.contains("[[runners]]"));
        assert!(rendered.contains("name = \"host1\""));
    }

    #[test]
    fn remove_runner_is_noop_when_absent() {
        let mut doc = ConfigDocument::parse(SAMPLE).unwrap();
        assert!(!doc.remove_runner("host9"));
        assert!(!doc.is_modified());

        assert!(doc.remove_runner("host1"));
        assert_eq!(doc.runner_names(), vec!["host2"]);
    }

    #[test]
    fn removing_last_runner_drops_the_array() {
        let mut doc = ConfigDocument::parse("concurrent = 1\n").unwrap();
        doc.upsert_runner("host1", &Table::new());
        assert!(doc.remove_runner("host1"));
        assert!(!doc.is_modified());
    }

    #[test]
    fn merge_and_seed_global() {
        let mut doc = ConfigDocument::parse(SAMPLE).unwrap();
        doc.seed_global(&fields("concurrent = 1\nshutdown_timeout = 0\n"));
        assert_eq!(doc.as_table()["concurrent"].as_integer(), Some(4));
        assert_eq!(doc.as_table()["shutdown_timeout"].as_integer(), Some(0));

        doc.merge_global(&fields("concurrent = 10\nrunners = []\n[session_server]\nlisten_address = \"[::]:8093\"\n"));
        let global = doc.global();
        assert_eq!(global["concurrent"].as_integer(), Some(10));
        assert_eq!(global["session_server"]["session_timeout"].as_integer(), Some(1800));
        assert_eq!(doc.runner_names(), vec!["host1", "host2"]);
    }

    #[test]
    fn unchanged_document_round_trips_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();
        let modified_before = fs::metadata(&path).unwrap().modified().unwrap();

        let mut doc = ConfigDocument::load(&path).unwrap();
        assert_eq!(doc.render().unwrap(), SAMPLE);
        assert!(!doc.write(&path).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified_before);
    }

    #[test]
    fn upsert_with_identical_values_is_not_a_change() {
        let mut doc = ConfigDocument::parse(SAMPLE).unwrap();
        doc.upsert_runner("host1", &fields("executor = \"docker\"\n[docker]\nimage = \"alpine:latest\"\n"));
        assert!(!doc.is_modified());
        assert_eq!(doc.render().unwrap(), SAMPLE);
    }

    #[test]
    fn modified_document_is_written_and_reloads_equal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();

        let mut doc = ConfigDocument::load(&path).unwrap();
        doc.remove_runner("host2");
        assert!(doc.write(&path).unwrap());
        assert!(!doc.is_modified());

        let reloaded = ConfigDocument::load(&path).unwrap();
        assert_eq!(reloaded.as_table(), doc.as_table());
        assert_eq!(reloaded.runner_names(), vec!["host1"]);
        assert_eq!(reloaded.find_runner("host1").unwrap()["id"].as_integer(), Some(42));
    }

    #[test]
    fn empty_document_is_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut doc = ConfigDocument::load(&path).unwrap();
        assert!(!doc.write(&path).unwrap());
        assert!(!path.exists());
    }
}
