// SecretMasker: a shared store of secret values (authentication tokens) that
// are replaced by `***` in anything logged or reported.

use parking_lot::RwLock;
use std::sync::Arc;

/// Replacement text used when a secret is found.
const MASK: &str = "***";

/// Secrets shorter than this are not masked; masking them would shred
/// ordinary output.
const MIN_SECRET_LENGTH: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    /// Kept sorted by length descending so a secret that contains another is
    /// replaced whole.
    secrets: Arc<RwLock<Vec<String>>>,
}

impl SecretMasker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret. Blank or very short values are ignored.
    pub fn add_value(&self, secret: &str) {
        let trimmed = secret.trim();
        if trimmed.len() < MIN_SECRET_LENGTH {
            return;
        }

        let mut secrets = self.secrets.write();
        if secrets.iter().any(|s| s == trimmed) {
            return;
        }
        secrets.push(trimmed.to_string());
        secrets.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    /// Replace every registered secret in `input` with `***`.
    pub fn mask_secrets(&self, input: &str) -> String {
        let secrets = self.secrets.read();
        secrets.iter().fold(input.to_string(), |acc, secret| {
            if acc.contains(secret.as_str()) {
                acc.replace(secret.as_str(), MASK)
            } else {
                acc
            }
        })
    }
}
