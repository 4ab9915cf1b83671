use anyhow::{Context, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

/// File helpers used around the configuration file.
pub struct IOUtil;

impl IOUtil {
    /// Read a file into a string, returning `Ok(None)` when it does not exist.
    pub fn read_if_exists(path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read '{}'", path.display())),
        }
    }

    /// Replace `path` with `content` atomically.
    ///
    /// The content is written to a temporary file in the same directory,
    /// flushed to disk and renamed over the target, so readers see either the
    /// old or the new file and never a torn write.
    pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in '{}'", dir.display()))?;
        tmp.write_all(content)
            .with_context(|| format!("Failed to write temporary file for '{}'", path.display()))?;
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("Failed to sync temporary file for '{}'", path.display()))?;
        tmp.persist(path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to replace '{}'", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_if_exists_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IOUtil::read_if_exists(&dir.path().join("nope.toml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn atomic_write_creates_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        IOUtil::atomic_write(&path, b"concurrent = 1\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "concurrent = 1\n");

        IOUtil::atomic_write(&path, b"concurrent = 2\n").unwrap();
        assert_eq!(
            IOUtil::read_if_exists(&path).unwrap().as_deref(),
            Some("concurrent = 2\n")
        );

        // No temporary files are left behind.
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
