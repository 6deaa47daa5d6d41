//! Profile Document - `profiles.json`, the persisted performance model
//!
//! Keyed by signature, then store name. Written whole to a temp file and
//! renamed over the old one, so a crash leaves either the previous or the new
//! document on disk.

use crate::error::{MediatorError, Result};
use crate::learning::ProfileDocument;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

pub const PROFILES_FILE_NAME: &str = "profiles.json";

pub struct ProfileFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProfileFile {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(PROFILES_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file loads as an empty document.
    pub fn load(&self) -> Result<ProfileDocument> {
        if !self.path.exists() {
            return Ok(ProfileDocument::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        let document: ProfileDocument = serde_json::from_str(&content)?;
        info!(
            "Loaded profiles for {} signature(s) from {}",
            document.len(),
            self.path.display()
        );
        Ok(document)
    }

    /// Write the document produced by `snapshot`.
    ///
    /// The snapshot is taken while holding the write lock, so concurrent
    /// writers can never leave an older snapshot on disk after a newer one.
    pub fn save_with(&self, snapshot: impl FnOnce() -> ProfileDocument) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| MediatorError::Persistence("profile document lock poisoned".to_string()))?;

        let document = snapshot();
        let content = serde_json::to_vec(&document)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Saved profiles for {} signature(s)", document.len());
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| MediatorError::Persistence("profile document lock poisoned".to_string()))?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::PerformanceProfile;
    use crate::query::QuerySignature;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(ProfileFile::new(dir.path()).load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let file = ProfileFile::new(dir.path());

        let mut stores = BTreeMap::new();
        stores.insert("redis".to_string(), PerformanceProfile::new("redis", 100));
        let mut document = ProfileDocument::new();
        document.insert(QuerySignature::of("GET k"), stores);

        file.save_with(|| document.clone()).unwrap();
        assert!(!dir.path().join("profiles.json.tmp").exists());

        let loaded = file.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[&QuerySignature::of("GET k")].contains_key("redis"));

        file.remove().unwrap();
        file.remove().unwrap();
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let dir = TempDir::new().unwrap();
        let file = ProfileFile::new(dir.path());
        std::fs::write(
            file.path(),
            r#"{
                "q_42": {
                    "postgres": {
                        "store": "postgres",
                        "window": {"capacity": 100, "samples": [
                            {"execution_time_ms": 4.0, "latency_ms": 1.2, "cpu_time_ms": 2.0,
                             "success": true, "timestamp": "2024-05-01T10:00:00Z", "rows": 3}
                        ]},
                        "updated_at": "2024-05-01T10:00:00Z",
                        "legacy_weight": 0.5
                    }
                }
            }"#,
        )
        .unwrap();

        let loaded = file.load().unwrap();
        let profile = &loaded[&QuerySignature::from("q_42".to_string())]["postgres"];
        assert_eq!(profile.samples(), 1);
    }
}
