//! Persistence for connections and their append-only snapshot and
//! measurement histories.

use crate::models::{Connection, ConnectionId, MeasurementResult, QuotaSnapshot};
use crate::services::vault::{CredentialVault, VaultError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt data file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Credential vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn connections(&self) -> Result<Vec<Connection>, StoreError>;

    async fn latest_snapshots(&self) -> Result<HashMap<ConnectionId, QuotaSnapshot>, StoreError>;

    async fn latest_measurements(
        &self,
    ) -> Result<HashMap<ConnectionId, MeasurementResult>, StoreError>;

    async fn append_snapshot(&self, snapshot: QuotaSnapshot) -> Result<(), StoreError>;

    async fn append_measurement(&self, result: MeasurementResult) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    connections: Vec<Connection>,
    #[serde(default)]
    snapshots: Vec<QuotaSnapshot>,
    #[serde(default)]
    measurements: Vec<MeasurementResult>,
}

impl StoreDocument {
    fn knows(&self, id: ConnectionId) -> bool {
        self.connections.iter().any(|c| c.id == id)
    }
}

/// Single JSON document on disk, rewritten atomically on every change.
///
/// The store owns the vault key's lifetime: creating a store from scratch
/// (or reinitialising one) discards the key, so credentials sealed for a
/// previous store cannot be read back.
pub struct JsonFileStore {
    path: PathBuf,
    vault: Arc<CredentialVault>,
    document: Mutex<StoreDocument>,
}

impl JsonFileStore {
    /// Open the store at `path`, initialising it when the file is missing.
    pub async fn open(
        path: impl Into<PathBuf>,
        vault: Arc<CredentialVault>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let document = match fs::read(&path).await {
            Ok(raw) => {
                let document: StoreDocument = serde_json::from_slice(&raw)?;
                info!(
                    path = %path.display(),
                    connections = document.connections.len(),
                    "Data store opened"
                );
                document
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                vault.reset()?;
                let document = StoreDocument::default();
                write_atomically(&path, &document).await?;
                info!(path = %path.display(), "Data store initialised with a fresh key");
                document
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            vault,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop every record and the encryption key.
    pub async fn reinitialize(&self) -> Result<(), StoreError> {
        let mut document = self.document.lock().await;
        self.vault.reset()?;
        *document = StoreDocument::default();
        write_atomically(&self.path, &document).await?;
        info!(path = %self.path.display(), "Data store reinitialised");
        Ok(())
    }

    /// Insert or replace connections by id, sealing any plaintext
    /// credentials on the way in. Returns the number of connections written.
    pub async fn import_connections(
        &self,
        connections: &[Connection],
    ) -> Result<usize, StoreError> {
        if connections.is_empty() {
            return Ok(0);
        }

        let mut document = self.document.lock().await;
        for connection in connections {
            let mut sealed = connection.clone();
            sealed.credentials = self.vault.seal_credentials(&connection.credentials)?;
            match document.connections.iter_mut().find(|c| c.id == sealed.id) {
                Some(existing) => *existing = sealed,
                None => document.connections.push(sealed),
            }
        }
        write_atomically(&self.path, &document).await?;
        info!(count = connections.len(), "Connections imported");
        Ok(connections.len())
    }

    /// Encrypt credentials still stored as plaintext. Returns how many
    /// connections were changed.
    pub async fn seal_plaintext_credentials(&self) -> Result<usize, StoreError> {
        let mut document = self.document.lock().await;
        let mut sealed = 0;
        for connection in document.connections.iter_mut() {
            let credentials = &connection.credentials;
            if CredentialVault::is_sealed(&credentials.username)
                && CredentialVault::is_sealed(&credentials.password)
            {
                continue;
            }
            connection.credentials = self.vault.seal_credentials(credentials)?;
            sealed += 1;
        }

        if sealed > 0 {
            write_atomically(&self.path, &document).await?;
            info!(sealed, "Plaintext credentials encrypted");
        }
        Ok(sealed)
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn connections(&self) -> Result<Vec<Connection>, StoreError> {
        Ok(self.document.lock().await.connections.clone())
    }

    async fn latest_snapshots(&self) -> Result<HashMap<ConnectionId, QuotaSnapshot>, StoreError> {
        let document = self.document.lock().await;
        Ok(latest_by_connection(
            &document.snapshots,
            |s| s.connection_id,
            |s| s.captured_at,
        ))
    }

    async fn latest_measurements(
        &self,
    ) -> Result<HashMap<ConnectionId, MeasurementResult>, StoreError> {
        let document = self.document.lock().await;
        Ok(latest_by_connection(
            &document.measurements,
            |m| m.connection_id,
            |m| m.captured_at,
        ))
    }

    async fn append_snapshot(&self, snapshot: QuotaSnapshot) -> Result<(), StoreError> {
        let mut document = self.document.lock().await;
        if !document.knows(snapshot.connection_id) {
            return Err(StoreError::UnknownConnection(snapshot.connection_id));
        }
        document.snapshots.push(snapshot);
        if let Err(e) = write_atomically(&self.path, &document).await {
            document.snapshots.pop();
            return Err(e);
        }
        Ok(())
    }

    async fn append_measurement(&self, result: MeasurementResult) -> Result<(), StoreError> {
        let mut document = self.document.lock().await;
        if !document.knows(result.connection_id) {
            return Err(StoreError::UnknownConnection(result.connection_id));
        }
        document.measurements.push(result);
        if let Err(e) = write_atomically(&self.path, &document).await {
            document.measurements.pop();
            return Err(e);
        }
        Ok(())
    }
}

/// Latest record per connection by capture time; later entries win ties.
fn latest_by_connection<T, K, F>(records: &[T], id: F, at: K) -> HashMap<ConnectionId, T>
where
    T: Clone,
    F: Fn(&T) -> ConnectionId,
    K: Fn(&T) -> chrono::DateTime<chrono::Utc>,
{
    let mut latest: HashMap<ConnectionId, &T> = HashMap::new();
    for record in records {
        let newer = latest
            .get(&id(record))
            .map_or(true, |current| at(record) >= at(current));
        if newer {
            latest.insert(id(record), record);
        }
    }
    latest.into_iter().map(|(k, v)| (k, v.clone())).collect()
}

async fn write_atomically(path: &Path, document: &StoreDocument) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(document)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp_path).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoredCredentials;
    use chrono::{Duration, Utc};
    use secrecy::ExposeSecret;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;

    fn plain_connection(id: ConnectionId) -> Connection {
        Connection {
            id,
            line_number: format!("02{id}"),
            name: format!("line-{id}"),
            description: String::new(),
            provider: "we".to_string(),
            egress_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            credentials: StoredCredentials {
                username: format!("user{id}"),
                password: "plain-pass".to_string(),
            },
        }
    }

    async fn open(dir: &TempDir) -> (JsonFileStore, Arc<CredentialVault>) {
        let vault = Arc::new(CredentialVault::new(dir.path().join(".secret.key")));
        let store = JsonFileStore::open(dir.path().join("data.json"), vault.clone())
            .await
            .unwrap();
        (store, vault)
    }

    #[tokio::test]
    async fn test_import_seals_and_persists() {
        let dir = TempDir::new().unwrap();
        let (store, vault) = open(&dir).await;

        store
            .import_connections(&[plain_connection(1), plain_connection(2)])
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("data.json")).unwrap();
        assert!(!raw.contains("plain-pass"));

        let (reopened, _) = open(&dir).await;
        let connections = reopened.connections().await.unwrap();
        assert_eq!(connections.len(), 2);
        let opened = vault.open_credentials(&connections[0].credentials).unwrap();
        assert_eq!(opened.password.expose_secret(), "plain-pass");
    }

    #[tokio::test]
    async fn test_new_store_discards_old_key() {
        let dir = TempDir::new().unwrap();
        let vault = Arc::new(CredentialVault::new(dir.path().join(".secret.key")));
        let old = vault.encrypt("from a previous store").unwrap();

        let _store = JsonFileStore::open(dir.path().join("data.json"), vault.clone())
            .await
            .unwrap();

        assert!(matches!(
            vault.decrypt(&old),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_reinitialize_invalidates_sealed_credentials() {
        let dir = TempDir::new().unwrap();
        let (store, vault) = open(&dir).await;
        store.import_connections(&[plain_connection(1)]).await.unwrap();
        let sealed = store.connections().await.unwrap()[0].credentials.clone();

        store.reinitialize().await.unwrap();

        assert!(store.connections().await.unwrap().is_empty());
        assert!(matches!(
            vault.open_credentials(&sealed),
            Err(VaultError::DecryptionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_seal_plaintext_credentials_migrates_legacy_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        let legacy = serde_json::json!({
            "connections": [plain_connection(1), plain_connection(2)],
        });
        std::fs::write(&path, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let vault = Arc::new(CredentialVault::new(dir.path().join(".secret.key")));
        let store = JsonFileStore::open(&path, vault.clone()).await.unwrap();

        assert_eq!(store.seal_plaintext_credentials().await.unwrap(), 2);
        assert_eq!(store.seal_plaintext_credentials().await.unwrap(), 0);
        for connection in store.connections().await.unwrap() {
            assert!(CredentialVault::is_sealed(&connection.credentials.password));
        }
    }

    #[tokio::test]
    async fn test_prefixed_plaintext_password_is_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        let mut legacy_row = plain_connection(1);
        legacy_row.credentials.password = "v1:hunter2".to_string();
        let legacy = serde_json::json!({ "connections": [legacy_row] });
        std::fs::write(&path, serde_json::to_vec(&legacy).unwrap()).unwrap();

        let vault = Arc::new(CredentialVault::new(dir.path().join(".secret.key")));
        let store = JsonFileStore::open(&path, vault.clone()).await.unwrap();

        assert_eq!(store.seal_plaintext_credentials().await.unwrap(), 1);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("v1:hunter2"));

        let stored = store.connections().await.unwrap()[0].credentials.clone();
        let opened = vault.open_credentials(&stored).unwrap();
        assert_eq!(opened.password.expose_secret(), "v1:hunter2");
    }

    #[tokio::test]
    async fn test_failed_append_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open(&dir).await;
        store.import_connections(&[plain_connection(1)]).await.unwrap();

        // A directory where the temp file should go makes the write fail.
        let tmp = dir.path().join("data.json.tmp");
        std::fs::create_dir(&tmp).unwrap();
        assert!(store
            .append_snapshot(QuotaSnapshot::new(1, 10.0, 90.0))
            .await
            .is_err());
        assert!(store.latest_snapshots().await.unwrap().is_empty());

        std::fs::remove_dir(&tmp).unwrap();
        store
            .append_snapshot(QuotaSnapshot::new(1, 30.0, 70.0))
            .await
            .unwrap();

        let (reopened, _) = open(&dir).await;
        let raw = std::fs::read_to_string(reopened.path()).unwrap();
        let document: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(document["snapshots"].as_array().unwrap().len(), 1);
        assert_eq!(reopened.latest_snapshots().await.unwrap()[&1].used, 30.0);
    }

    #[tokio::test]
    async fn test_latest_record_per_connection() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open(&dir).await;
        store
            .import_connections(&[plain_connection(1), plain_connection(2)])
            .await
            .unwrap();

        let now = Utc::now();
        store
            .append_snapshot(QuotaSnapshot::new(1, 10.0, 90.0).captured_at(now - Duration::hours(1)))
            .await
            .unwrap();
        store
            .append_snapshot(QuotaSnapshot::new(1, 20.0, 80.0).captured_at(now))
            .await
            .unwrap();

        let latest = store.latest_snapshots().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[&1].used, 20.0);
        assert!(store.latest_measurements().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_for_unknown_connection() {
        let dir = TempDir::new().unwrap();
        let (store, _) = open(&dir).await;
        assert!(matches!(
            store.append_snapshot(QuotaSnapshot::new(42, 1.0, 1.0)).await,
            Err(StoreError::UnknownConnection(42))
        ));
    }
}
