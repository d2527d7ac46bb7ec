//! Credential store: one secret per file under a per-user config directory.
//!
//! Every operation degrades instead of failing. A missing directory, a permission error
//! or an unreadable file is logged and reported as "no value" (`None`) or "not saved"
//! (`false`); nothing here returns an error to the caller.
//!
//! ```rust
//! use wirtual::storage::ConfigStore;
//!
//! let dir = std::env::temp_dir().join("wirtual-doc-store");
//! let store = ConfigStore::new(dir);
//! if store.save("api_key", "sk-ant-example") {
//!     assert_eq!(store.load("api_key").as_deref(), Some("sk-ant-example"));
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::wirtual::config::default_config_dir;

/// File name of the stored Anthropic API key.
pub const API_KEY: &str = "api_key";

/// File name of the stored system prompt suffix.
pub const SYSTEM_PROMPT: &str = "system_prompt";

/// Reads and writes plain-text secrets inside a single directory.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl Default for ConfigStore {
    /// A store rooted at `~/.anthropic`.
    fn default() -> Self {
        Self::new(default_config_dir())
    }
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the trimmed contents of `name`. Empty files count as absent.
    pub fn load(&self, name: &str) -> Option<String> {
        let path = self.dir.join(name);
        if !path.exists() {
            return None;
        }
        match fs::read_to_string(&path) {
            Ok(data) => {
                let data = data.trim();
                if data.is_empty() {
                    None
                } else {
                    Some(data.to_string())
                }
            }
            Err(e) => {
                log::warn!("Error loading {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write `data` to `name`, restricting the file to owner read/write.
    ///
    /// Returns `false` (after logging) when anything along the way fails.
    pub fn save(&self, name: &str, data: &str) -> bool {
        match self.try_save(name, data) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Error saving {}: {}", self.dir.join(name).display(), e);
                false
            }
        }
    }

    fn try_save(&self, name: &str, data: &str) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        fs::write(&path, data)?;
        restrict_to_owner(&path)
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        assert_eq!(store.load("nope"), None);
    }

    #[test]
    fn test_blank_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        assert!(store.save(SYSTEM_PROMPT, "   \n"));
        assert_eq!(store.load(SYSTEM_PROMPT), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("nested"));
        assert!(store.save(API_KEY, "secret\n"));

        let mode = fs::metadata(store.dir().join(API_KEY))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.load(API_KEY).as_deref(), Some("secret"));
    }
}
