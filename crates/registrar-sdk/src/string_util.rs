/// String helpers.
pub struct StringUtil;

impl StringUtil {
    /// Convert a string to a boolean.
    ///
    /// Valid true values: `"1"`, `"true"`, `"yes"`, `"on"` (case-insensitive).
    /// Valid false values: `"0"`, `"false"`, `"no"`, `"off"` (case-insensitive).
    /// Returns `None` for unrecognized values.
    pub fn convert_to_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    /// Render a tagged value as the text an environment variable would carry.
    ///
    /// Scalars become their plain representation, arrays of scalars are
    /// comma-joined and tables fall back to inline TOML.
    pub fn value_to_text(value: &toml::Value) -> String {
        match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Integer(i) => i.to_string(),
            // Debug keeps the fraction: 2.0 stays "2.0".
            toml::Value::Float(f) => format!("{f:?}"),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Datetime(d) => d.to_string(),
            toml::Value::Array(items) => items
                .iter()
                .map(Self::value_to_text)
                .collect::<Vec<_>>()
                .join(","),
            toml::Value::Table(_) => value.to_string(),
        }
    }
}
