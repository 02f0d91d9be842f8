use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub input_name: String,
    pub book_title: String,
    pub output_dir: PathBuf,
    pub chapter_count: usize,
    pub processed_at: DateTime<Utc>,
}

/// Record of inputs that have already been split, keyed by input file name.
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    async fn get(&self, input_name: &str) -> anyhow::Result<Option<ProcessedEntry>>;
    async fn record(&self, entry: ProcessedEntry) -> anyhow::Result<()>;
}

/// Key under which an input is stored: its file name, without directories.
pub fn input_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// JSON file holding every entry. Writes are serialized through a mutex and replace the file
/// atomically, so one process is the single writer.
#[derive(Debug)]
pub struct LocalFsProcessedStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFsProcessedStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> anyhow::Result<BTreeMap<String, ProcessedEntry>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read: {}", self.path.display()));
            }
        };
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse processed log: {}", self.path.display()))
    }
}

#[async_trait]
impl ProcessedStore for LocalFsProcessedStore {
    async fn get(&self, input_name: &str) -> anyhow::Result<Option<ProcessedEntry>> {
        let mut entries = self.load().await?;
        Ok(entries.remove(input_name))
    }

    async fn record(&self, entry: ProcessedEntry) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(entry.input_name.clone(), entry);
        let data = serde_json::to_vec_pretty(&entries).context("serialize processed log")?;
        write_atomic(&self.path, &data)
            .await
            .context("write processed log")
    }
}

pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
