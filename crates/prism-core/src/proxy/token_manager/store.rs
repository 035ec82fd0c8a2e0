//! Durable JSON-file persistence for the credential pool.
//!
//! The file is a flat JSON array of credentials. Writes are whole-file
//! rewrites (read, merge, rewrite); reads go through a short-TTL cache since
//! the pool re-reads the file on reload and admin paths. Single-writer
//! assumption: concurrent external editors are out of scope.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use prism_types::credential::Credential;

use crate::error::ProxyResult;

const READ_CACHE_TTL: Duration = Duration::from_secs(5);

pub struct TokenStore {
    path: PathBuf,
    read_cache: Mutex<Option<(Instant, Vec<Credential>)>>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), read_cache: Mutex::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full credential array. A missing file is an empty pool, not
    /// an error.
    pub async fn read_all(&self) -> ProxyResult<Vec<Credential>> {
        {
            let cache = self.read_cache.lock();
            if let Some((at, credentials)) = cache.as_ref() {
                if at.elapsed() < READ_CACHE_TTL {
                    return Ok(credentials.clone());
                }
            }
        }

        let credentials = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str::<Vec<Credential>>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("[TokenStore] Token file {} not found, starting empty", self.path.display());
                Vec::new()
            },
            Err(e) => return Err(e.into()),
        };

        *self.read_cache.lock() = Some((Instant::now(), credentials.clone()));
        Ok(credentials)
    }

    /// Whole-file rewrite with the given array.
    pub async fn write_all(&self, credentials: &[Credential]) -> ProxyResult<()> {
        let raw = serde_json::to_string_pretty(credentials)?;
        tokio::fs::write(&self.path, raw).await?;
        *self.read_cache.lock() = Some((Instant::now(), credentials.to_vec()));
        Ok(())
    }

    /// Merge the in-memory view back into the file: entries matching on
    /// `refresh_token` are replaced, disk-only entries (disabled credentials
    /// the pool no longer holds) are preserved, new entries are appended.
    pub async fn merge_active(&self, active: &[Credential]) -> ProxyResult<()> {
        self.invalidate();
        let mut on_disk = self.read_all().await?;

        for credential in active {
            match on_disk
                .iter_mut()
                .find(|existing| existing.refresh_token == credential.refresh_token)
            {
                Some(existing) => *existing = credential.clone(),
                None => on_disk.push(credential.clone()),
            }
        }

        self.write_all(&on_disk).await
    }

    /// Drop the read cache, forcing the next read to hit the disk.
    pub fn invalidate(&self) {
        *self.read_cache.lock() = None;
    }
}
