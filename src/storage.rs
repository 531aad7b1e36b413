//! Flat byte sink for uploaded file contents.
//!
//! Blobs live directly under one upload directory, keyed by filename only.
//! Pairing a blob with its owning file record is the record store's job.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::{Result, protocol};

pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the sink, creating the upload directory if needed.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(root.as_ref()).await?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Client-supplied names are reduced to their basename so the flat sink
    // layout holds and a path component cannot escape the directory.
    fn blob_path(&self, filename: &str) -> PathBuf {
        let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        self.root.join(name)
    }

    /// Stream up to `declared` bytes from the reader into the blob.
    ///
    /// Returns the byte count actually written; the caller treats anything
    /// short of `declared` as a failed upload. A partial blob from a short or
    /// failed write is left in place, not rolled back.
    pub async fn store<R: AsyncRead + Unpin>(
        &self,
        filename: &str,
        reader: &mut R,
        declared: u64,
    ) -> Result<u64> {
        let mut file = fs::File::create(self.blob_path(filename)).await?;
        let written = protocol::copy_payload(reader, &mut file, declared).await?;
        file.flush().await?;
        Ok(written)
    }

    /// Read a blob back in full. `None` when the blob is missing, which the
    /// session surfaces as a zero-length transfer rather than an error.
    pub async fn load(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(filename)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_store_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("uploads")).await.unwrap();

        let mut payload = Cursor::new(b"hello".to_vec());
        let written = store.store("notes.txt", &mut payload, 5).await.unwrap();
        assert_eq!(written, 5);

        let bytes = store.load("notes.txt").await.unwrap().unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_load_missing_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.load("nope.bin").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_payload_reports_written_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let mut payload = Cursor::new(b"abc".to_vec());
        let written = store.store("short.bin", &mut payload, 10).await.unwrap();
        assert_eq!(written, 3);

        // The partial blob is left in place.
        assert_eq!(store.load("short.bin").await.unwrap().unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_path_components_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        let mut payload = Cursor::new(b"x".to_vec());
        store.store("../escape.txt", &mut payload, 1).await.unwrap();

        assert!(dir.path().join("escape.txt").exists());
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }
}
