// Module parameters: the input surface handed over by the automation layer,
// either as a JSON object (`--params-file`) or assembled from flags.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use toml::{Table, Value};

/// Whether the runner should be registered or removed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DesiredPresence {
    #[default]
    Present,
    Absent,
}

/// One declared environment variable for the registration process.
///
/// The value keeps its original type; it is turned into text only when the
/// process is spawned.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: Value,
}

impl EnvironmentVariable {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Inputs of one reconciliation run.
///
/// Options left out or given as `null` are `None` / empty and never mean
/// "unset this field".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleParams {
    #[serde(deserialize_with = "null_as_default")]
    pub api_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub token: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub state: DesiredPresence,
    pub executor: Option<String>,
    pub default_image: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub global_params: Table,
    #[serde(deserialize_with = "deserialize_environ_vars")]
    pub environ_vars: Vec<EnvironmentVariable>,
    pub template_file: Option<PathBuf>,
    #[serde(deserialize_with = "null_as_default")]
    pub recreate: bool,
}

impl ModuleParams {
    /// Parse module arguments from a JSON object.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads a JSON object into declaration order, keeping repeated names so they
/// can be rejected later instead of silently collapsing.
fn deserialize_environ_vars<'de, D>(deserializer: D) -> Result<Vec<EnvironmentVariable>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvironVisitor;

    impl<'de> Visitor<'de> for EnvironVisitor {
        type Value = Vec<EnvironmentVariable>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a mapping of environment variable names to values")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut vars = Vec::new();
            while let Some((name, value)) = map.next_entry::<String, Value>()? {
                vars.push(EnvironmentVariable { name, value });
            }
            Ok(vars)
        }
    }

    deserializer.deserialize_any(EnvironVisitor)
}
