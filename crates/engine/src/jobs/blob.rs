//! Blob storage for job artifacts.
//!
//! Artifacts are addressed by `"{jobId}/{slot}"` keys, so concurrent writers
//! for different jobs never collide. A write either lands completely or not
//! at all; readers never observe a partially written artifact.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use jobtree_core::JobId;

/// Slot holding a job's primary output.
pub const MAIN_SLOT: &str = "main";

/// Build the conventional key for one of a job's artifact slots.
pub fn blob_key(job_id: JobId, slot: &str) -> String {
    format!("{job_id}/{slot}")
}

/// Existence and size of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub key: String,
    pub len: u64,
}

/// A stored artifact with its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub descriptor: BlobDescriptor,
    pub content: Vec<u8>,
}

/// Blob store error.
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Blob store abstraction.
pub trait BlobStore: Send + Sync {
    /// Read an artifact; `None` if nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Blob>, BlobStoreError>;

    /// Existence and length without reading the content.
    fn stat(&self, key: &str) -> Result<Option<BlobDescriptor>, BlobStoreError>;

    /// Store `content` under `key`, replacing any previous artifact.
    fn write(&self, key: &str, content: &mut dyn Read) -> Result<BlobDescriptor, BlobStoreError>;
}

fn validate_key(key: &str) -> Result<(), BlobStoreError> {
    let valid = !key.is_empty()
        && !key.starts_with('/')
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(BlobStoreError::InvalidKey(key.to_string()))
    }
}

/// In-memory blob store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted.
    pub fn keys(&self) -> Result<Vec<String>, BlobStoreError> {
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        let mut keys: Vec<_> = blobs.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

fn poisoned() -> BlobStoreError {
    BlobStoreError::Storage("blob map lock poisoned".to_string())
}

impl BlobStore for InMemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Blob>, BlobStoreError> {
        validate_key(key)?;
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs.get(key).map(|content| Blob {
            descriptor: BlobDescriptor {
                key: key.to_string(),
                len: content.len() as u64,
            },
            content: content.clone(),
        }))
    }

    fn stat(&self, key: &str) -> Result<Option<BlobDescriptor>, BlobStoreError> {
        validate_key(key)?;
        let blobs = self.blobs.read().map_err(|_| poisoned())?;
        Ok(blobs.get(key).map(|content| BlobDescriptor {
            key: key.to_string(),
            len: content.len() as u64,
        }))
    }

    fn write(&self, key: &str, content: &mut dyn Read) -> Result<BlobDescriptor, BlobStoreError> {
        validate_key(key)?;
        // Buffer first so a failing reader leaves the previous value untouched.
        let mut buf = Vec::new();
        content.read_to_end(&mut buf).map_err(|source| BlobStoreError::Io {
            key: key.to_string(),
            source,
        })?;
        let len = buf.len() as u64;
        let mut blobs = self.blobs.write().map_err(|_| poisoned())?;
        blobs.insert(key.to_string(), buf);
        Ok(BlobDescriptor {
            key: key.to_string(),
            len,
        })
    }
}

/// Blob store backed by a directory on local disk.
///
/// Each key maps to a file below `root`. Writes go to a sibling `.partial`
/// file that is renamed into place once complete.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open (and create if missing) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| BlobStoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobStoreError> {
        validate_key(key)?;
        let plain = Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

impl BlobStore for LocalBlobStore {
    fn get(&self, key: &str) -> Result<Option<Blob>, BlobStoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(content) => Ok(Some(Blob {
                descriptor: BlobDescriptor {
                    key: key.to_string(),
                    len: content.len() as u64,
                },
                content,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BlobStoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn stat(&self, key: &str) -> Result<Option<BlobDescriptor>, BlobStoreError> {
        let path = self.path_for(key)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(BlobDescriptor {
                key: key.to_string(),
                len: meta.len(),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BlobStoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, content: &mut dyn Read) -> Result<BlobDescriptor, BlobStoreError> {
        let path = self.path_for(key)?;
        let io_err = |source| BlobStoreError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut partial = path.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let written = (|| -> io::Result<u64> {
            let mut file = fs::File::create(&partial)?;
            let len = io::copy(content, &mut file)?;
            file.flush()?;
            file.sync_all()?;
            Ok(len)
        })();

        let len = match written {
            Ok(len) => len,
            Err(source) => {
                let _ = fs::remove_file(&partial);
                return Err(io_err(source));
            }
        };

        fs::rename(&partial, &path).map_err(io_err)?;
        Ok(BlobDescriptor {
            key: key.to_string(),
            len,
        })
    }
}
