//! Durable key-value state on disk.
//!
//! One JSON file per key under the state directory. Writes go through
//! a temp file and rename, so a crash mid-write never leaves a torn
//! value and the file always mirrors the last fully-applied in-memory
//! state.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key holding the operator's selected-user set.
pub const SELECTION_KEY: &str = "selected_users";

/// Key holding the notification store snapshot.
pub const NOTIFICATIONS_KEY: &str = "notifications";

pub type PersistResult<T> = std::result::Result<T, PersistError>;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("state encode/decode failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Small JSON key-value store rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    /// Opens the store rooted at `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> PersistResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Default state directory: `$XDG_STATE_HOME/watchdesk`, falling
    /// back under `/tmp` when the platform has no state dir.
    pub fn default_dir() -> PathBuf {
        dirs::state_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("watchdesk")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Reads a key; `Ok(None)` when it has never been written.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> PersistResult<Option<T>> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Writes a key atomically: serialize, write a sibling temp file,
    /// rename over the target.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> PersistResult<()> {
        let path = self.path_for(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        let raw = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalStore::open(dir.path()).expect("open store");
        (dir, store)
    }

    #[test]
    fn test_missing_key_is_none() {
        let (_dir, store) = store();
        let value: Option<Vec<i64>> = store.get("never_written").expect("get");
        assert_eq!(value, None);
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        store.put("numbers", &vec![1i64, 2, 3]).expect("put");
        let value: Option<Vec<i64>> = store.get("numbers").expect("get");
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_put_overwrites_previous_value() {
        let (_dir, store) = store();
        store.put("value", &"first").expect("put first");
        store.put("value", &"second").expect("put second");
        let value: Option<String> = store.get("value").expect("get");
        assert_eq!(value.as_deref(), Some("second"));
    }

    #[test]
    fn test_put_leaves_no_temp_file() {
        let (dir, store) = store();
        store.put("value", &42u32).expect("put");
        assert!(dir.path().join("value.json").exists());
        assert!(!dir.path().join("value.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_value_is_an_error_not_a_panic() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("broken.json"), "{not json").expect("write");
        let result: PersistResult<Option<u32>> = store.get("broken");
        assert!(matches!(result, Err(PersistError::Serde(_))));
    }
}
