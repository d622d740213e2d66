//! Resource lookup collaborator, with in-memory and on-disk stores.
//!
//! On disk, resources live in a two-level directory keyed by the BLAKE3
//! hash of the resource key:
//!   {root}/{hash[0..2]}/{full_hash}
//!
//! Writes go to a temp file and are renamed into place, so a reader sees
//! either the whole resource or nothing.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::io::AsyncReadExt;

use crate::error::StorageError;

pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// The resource split into buffers, or `StorageError::NotFound`.
    async fn get_values(&self, key: &str) -> Result<ByteStream, StorageError>;
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryResourceStore {
    /// key → buffers, in order
    values: Arc<DashMap<String, Vec<Bytes>>>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, buffers: Vec<Bytes>) {
        self.values.insert(key.into(), buffers);
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get_values(&self, key: &str) -> Result<ByteStream, StorageError> {
        let buffers = self
            .values
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(stream::iter(buffers.into_iter().map(Ok)).boxed())
    }
}

// ── On disk ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct FsResourceStore {
    root: PathBuf,
    /// Size of the buffers a resource is streamed out in.
    chunk_bytes: usize,
}

impl FsResourceStore {
    pub fn new(root: impl Into<PathBuf>, chunk_bytes: usize) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create resource root: {}", root.display()))?;
        Ok(Self {
            root,
            chunk_bytes: chunk_bytes.max(1),
        })
    }

    pub fn has(&self, key: &str) -> bool {
        self.resource_path(key).exists()
    }

    /// Store a resource, replacing any previous value under `key`.
    pub fn put(&self, key: &str, data: &[u8]) -> anyhow::Result<()> {
        let path = self.resource_path(key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create resource dir: {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
            file.write_all(data).context("failed to write resource data")?;
            file.sync_all().context("failed to sync resource to disk")?;
        }

        fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        tracing::debug!(key, bytes = data.len(), "resource stored");
        Ok(())
    }

    fn resource_path(&self, key: &str) -> PathBuf {
        let hex = blake3::hash(key.as_bytes()).to_hex();
        self.root.join(&hex[0..2]).join(hex.as_str())
    }
}

#[async_trait]
impl ResourceStore for FsResourceStore {
    /// Opens the resource now; its bytes are read one chunk per poll.
    async fn get_values(&self, key: &str) -> Result<ByteStream, StorageError> {
        let path = self.resource_path(key);
        let file = match tokio::fs::File::open(&path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            opened => opened
                .with_context(|| format!("failed to open resource: {}", path.display()))?,
        };

        tracing::trace!(key, chunk_bytes = self.chunk_bytes, "resource opened");
        let chunk = self.chunk_bytes;
        Ok(stream::unfold(Some(file), move |file| async move {
            let mut file = file?;
            match read_chunk(&mut file, chunk).await {
                Ok(None) => None,
                Ok(Some(data)) => Some((Ok(data), Some(file))),
                Err(e) => Some((Err(StorageError::Backend(e)), None)),
            }
        })
        .boxed())
    }
}

/// Fill up to `chunk` bytes, `None` at end of file.
async fn read_chunk(file: &mut tokio::fs::File, chunk: usize) -> anyhow::Result<Option<Bytes>> {
    let mut buf = vec![0u8; chunk];
    let mut filled = 0;
    while filled < chunk {
        let n = file
            .read(&mut buf[filled..])
            .await
            .context("failed to read resource")?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Ok(None);
    }
    buf.truncate(filled);
    Ok(Some(Bytes::from(buf)))
}
