// Helpers over the tagged-value tree (`toml::Value` / `toml::Table`).

use toml::{Table, Value};

/// Merge `overlay` into `target`. Keys in `overlay` win; nested tables are
/// merged key by key so keys only present in `target` survive.
pub fn deep_merge(target: &mut Table, overlay: &Table) {
    for (key, value) in overlay {
        match (target.get_mut(key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Copy keys from `defaults` into `target` only where `target` has nothing.
pub fn fill_missing(target: &mut Table, defaults: &Table) {
    for (key, value) in defaults {
        match (target.get_mut(key), value) {
            (None, _) => {
                target.insert(key.clone(), value.clone());
            }
            (Some(Value::Table(existing)), Value::Table(nested)) => {
                fill_missing(existing, nested);
            }
            _ => {}
        }
    }
}

/// Set `value` at a dotted path (`session_server.session_timeout`), creating
/// intermediate tables. A non-table in the way is replaced.
pub fn set_dotted(target: &mut Table, dotted: &str, value: Value) {
    let mut parts = dotted.split('.').peekable();
    let mut current = target;
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part.to_string(), value);
            return;
        }
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Table(Table::new()));
        if !slot.is_table() {
            *slot = Value::Table(Table::new());
        }
        match slot {
            Value::Table(t) => current = t,
            _ => return,
        }
    }
}

/// Parse a command-line value as a TOML value, falling back to a plain string
/// (`10` → integer, `true` → boolean, `15m` → string).
pub fn parse_scalar(raw: &str) -> Value {
    let wrapped = format!("v = {raw}");
    match wrapped.parse::<Table>() {
        Ok(mut t) => t.remove("v").unwrap_or_else(|| Value::String(raw.to_string())),
        Err(_) => Value::String(raw.to_string()),
    }
}
