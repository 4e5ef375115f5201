//! Byte sources for outgoing payloads
//!
//! The core never reads payload content itself. It asks a source for its size
//! and an open stream, then hands the stream to the provider.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Opened payload byte stream
pub type PayloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// Something that can be sized and opened for sending
#[async_trait]
pub trait PayloadSource: Send + Sync {
    /// Declared size in bytes, `None` for streams of unknown length
    async fn size(&self) -> io::Result<Option<u64>>;

    /// Open the byte stream from the beginning
    async fn open(&self) -> io::Result<PayloadReader>;
}

// ----------------------------------------------------------------------------
// File Source
// ----------------------------------------------------------------------------

/// Regular file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PayloadSource for FileSource {
    async fn size(&self) -> io::Result<Option<u64>> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", self.path.display()),
            ));
        }
        Ok(Some(metadata.len()))
    }

    async fn open(&self) -> io::Result<PayloadReader> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }
}

// ----------------------------------------------------------------------------
// In-memory Source
// ----------------------------------------------------------------------------

/// In-memory bytes, cheap to reopen
#[derive(Debug, Clone)]
pub struct BytesSource {
    bytes: Arc<[u8]>,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
impl PayloadSource for BytesSource {
    async fn size(&self) -> io::Result<Option<u64>> {
        Ok(Some(self.bytes.len() as u64))
    }

    async fn open(&self) -> io::Result<PayloadReader> {
        Ok(Box::new(io::Cursor::new(self.bytes.clone())))
    }
}
