//! On-disk persistence of session credentials.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use proto::{Credentials, StoreError};
use tracing::{debug, info};

const CREDS_FILE: &str = "creds.json";

/// Stores the credential blob as `creds.json` inside a session directory.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    /// Loads stored credentials. A missing file means "none stored".
    pub async fn load(&self) -> Result<Option<Credentials>, StoreError> {
        let data = match tokio::fs::read(self.creds_path()).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let creds = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Serialization(format!("parsing {CREDS_FILE}: {e}")))?;
        Ok(Some(creds))
    }

    /// Replaces the stored credentials atomically (temp file + rename).
    pub async fn save(&self, creds: &Credentials) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_vec_pretty(creds)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.dir.join(format!("{CREDS_FILE}.tmp"));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, self.creds_path()).await?;
        debug!(dir = %self.dir.display(), "Credentials saved");
        Ok(())
    }

    /// Deletes the whole session directory.
    pub async fn wipe(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(dir = %self.dir.display(), "Session credentials wiped");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_in(tmp: &tempfile::TempDir) -> CredentialStore {
        CredentialStore::new(tmp.path().join("session"))
    }

    #[tokio::test]
    async fn load_returns_none_when_nothing_stored() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(store_in(&tmp).load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_and_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);

        store.save(&Credentials(json!({"v": 1}))).await.unwrap();
        store.save(&Credentials(json!({"v": 2}))).await.unwrap();

        assert_eq!(
            store.load().await.unwrap(),
            Some(Credentials(json!({"v": 2})))
        );
        assert!(!store.dir().join("creds.json.tmp").exists());
    }

    #[tokio::test]
    async fn wipe_removes_directory_and_tolerates_absence() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        store.save(&Credentials(json!({"v": 1}))).await.unwrap();
        std::fs::write(store.dir().join("app-state-sync-key.json"), "{}").unwrap();

        store.wipe().await.unwrap();
        assert!(!store.dir().exists());
        assert_eq!(store.load().await.unwrap(), None);

        store.wipe().await.expect("second wipe is a no-op");
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(&tmp);
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("creds.json"), "{not json").unwrap();

        let err = store.load().await.expect_err("corrupt");
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
