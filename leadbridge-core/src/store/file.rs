//! JSON file-backed key-value storage.
//!
//! The whole map is rewritten on every mutation: the new contents go to a
//! sibling temporary file which is then renamed over the existing one, so a
//! reader never observes a half-written file. On Unix the file is readable
//! by its owner only.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{KeyValueStore, Secret, StoreError};

/// Key-value store persisted as a flat JSON object.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file is treated as an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let contents = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");
        write_restricted(&tmp, contents.as_bytes())?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply `mutate` to a copy of the map, persist it, then publish it.
    fn update<F>(&self, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let mut data = self.data.write();
        let mut next = data.clone();
        if !mutate(&mut next) {
            return Ok(());
        }
        self.persist(&next)?;
        *data = next;
        Ok(())
    }
}

fn write_restricted(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // A leftover temp file keeps its old mode.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("path", &self.path)
            .field("keys_count", &self.data.read().len())
            .finish()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        Ok(self.data.read().get(key).map(Secret::new))
    }

    fn set(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        self.update(|data| {
            data.insert(key.to_string(), value.expose().to_string());
            true
        })
    }

    fn set_many(&self, entries: &[(&str, &Secret)]) -> Result<(), StoreError> {
        self.update(|data| {
            for (key, value) in entries {
                data.insert(key.to_string(), value.expose().to_string());
            }
            !entries.is_empty()
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.update(|data| data.remove(key).is_some())
    }

    fn delete_many(&self, keys: &[&str]) -> Result<(), StoreError> {
        self.update(|data| {
            let mut changed = false;
            for key in keys {
                changed |= data.remove(*key).is_some();
            }
            changed
        })
    }

    fn apply(&self, sets: &[(&str, &Secret)], deletes: &[&str]) -> Result<(), StoreError> {
        self.update(|data| {
            let mut changed = !sets.is_empty();
            for (key, value) in sets {
                data.insert(key.to_string(), value.expose().to_string());
            }
            for key in deletes {
                changed |= data.remove(*key).is_some();
            }
            changed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("credentials.json")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let (store, temp) = test_store();
        store.set("leadbridge/user", &Secret::new("{\"id\":\"7\"}")).unwrap();
        drop(store);

        let reopened = FileStore::open(temp.path().join("credentials.json")).unwrap();
        assert_eq!(
            reopened.get("leadbridge/user").unwrap().unwrap().expose(),
            "{\"id\":\"7\"}"
        );
    }

    #[test]
    fn test_file_store_delete_missing_key() {
        let (store, _temp) = test_store();
        store.delete("nope").unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_file_store_delete_many_persists() {
        let (store, temp) = test_store();
        store.set("a", &Secret::new("1")).unwrap();
        store.set("b", &Secret::new("2")).unwrap();
        store.delete_many(&["a", "b"]).unwrap();

        let reopened = FileStore::open(temp.path().join("credentials.json")).unwrap();
        assert!(reopened.get("a").unwrap().is_none());
        assert!(reopened.get("b").unwrap().is_none());
    }

    #[test]
    fn test_file_store_apply_is_one_rewrite() {
        let (store, temp) = test_store();
        store.set("refresh", &Secret::new("old")).unwrap();

        store
            .apply(&[("access", &Secret::new("new"))], &["refresh"])
            .unwrap();

        let reopened = FileStore::open(temp.path().join("credentials.json")).unwrap();
        assert_eq!(reopened.get("access").unwrap().unwrap().expose(), "new");
        assert!(reopened.get("refresh").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (store, temp) = test_store();
        store.set("access", &Secret::new("token")).unwrap();

        let mode = fs::metadata(temp.path().join("credentials.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials.json");
        fs::write(&path, "not json").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(StoreError::SerializationError(_))));
    }
}
