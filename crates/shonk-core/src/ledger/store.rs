use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::{domain::UserId, errors::Error, ledger::UserRecord, Result};

pub type Records = BTreeMap<UserId, UserRecord>;

/// Durable backing for the ledger.
///
/// The ledger reads everything once on startup and rewrites the whole set
/// after every mutation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self) -> Result<Records>;
    async fn save(&self, records: &Records) -> Result<()>;
}

/// JSON object keyed by decimal user id, replaced atomically on every save.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|s| s.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load(&self) -> Result<Records> {
        let txt = match tokio::fs::read_to_string(&self.path).await {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Records::new()),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if txt.trim().is_empty() {
            return Ok(Records::new());
        }

        let raw: BTreeMap<String, UserRecord> = serde_json::from_str(&txt).map_err(|e| {
            Error::Persistence(format!("failed to parse {}: {e}", self.path.display()))
        })?;

        let mut out = Records::new();
        for (key, rec) in raw {
            let id = key.trim().parse::<i64>().map_err(|_| {
                Error::Persistence(format!(
                    "invalid user id {key:?} in {}",
                    self.path.display()
                ))
            })?;
            out.insert(UserId(id), rec);
        }
        Ok(out)
    }

    async fn save(&self, records: &Records) -> Result<()> {
        let raw: BTreeMap<String, &UserRecord> = records
            .iter()
            .map(|(id, rec)| (id.0.to_string(), rec))
            .collect();
        let payload = serde_json::to_vec_pretty(&raw)
            .map_err(|e| Error::Persistence(format!("failed to encode ledger: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Persistence(format!("failed to prepare ledger directory: {e}"))
            })?;
        }

        let tmp = self.temp_path();
        let write = async {
            let mut f = tokio::fs::File::create(&tmp).await?;
            f.write_all(&payload).await?;
            f.sync_all().await?;
            tokio::fs::rename(&tmp, &self.path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Persistence(format!(
                "failed to write {}: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// Non-durable store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: tokio::sync::Mutex<Records>,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Records) -> Self {
        Self {
            records: tokio::sync::Mutex::new(records),
            saves: Default::default(),
        }
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub async fn stored(&self) -> Records {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load(&self) -> Result<Records> {
        Ok(self.records.lock().await.clone())
    }

    async fn save(&self, records: &Records) -> Result<()> {
        *self.records.lock().await = records.clone();
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
