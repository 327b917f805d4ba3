use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};
use tracing::debug;

/// Receipt PDFs on the local filesystem, one file per check.
#[derive(Debug, Clone)]
pub struct ReceiptFiles {
    dir: PathBuf,
}

impl ReceiptFiles {
    /// Creates the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create check dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `bytes` so that `name` either holds the whole file or does not
    /// exist: temp file, fsync, rename.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!(".{name}.tmp"));

        let mut file = fs::File::create(&tmp)
            .await
            .with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(bytes).await.context("write receipt")?;
        file.sync_all().await.context("sync receipt")?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("rename into {}", target.display()));
        }
        debug!(path = %target.display(), size = bytes.len(), "receipt written");
        Ok(())
    }

    pub async fn read(&self, name: &str) -> std::io::Result<Bytes> {
        fs::read(self.dir.join(name)).await.map(Bytes::from)
    }

    /// Deletes `name`; a file that is already gone is not an error.
    pub async fn remove(&self, name: &str) -> std::io::Result<()> {
        match fs::remove_file(self.dir.join(name)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.dir.join(name)).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let files = ReceiptFiles::open(dir.path()).await.unwrap();
        files.write("doc_1.pdf", b"%PDF-1.5 body").await.unwrap();

        assert!(files.exists("doc_1.pdf").await);
        assert_eq!(files.read("doc_1.pdf").await.unwrap(), Bytes::from_static(b"%PDF-1.5 body"));
        // no temp file left behind
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["doc_1.pdf"]);
    }

    #[tokio::test]
    async fn open_creates_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("checks");
        let files = ReceiptFiles::open(&nested).await.unwrap();
        assert!(files.dir().is_dir());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let files = ReceiptFiles::open(dir.path()).await.unwrap();
        files.write("doc_1.pdf", b"%PDF-1.5").await.unwrap();
        files.remove("doc_1.pdf").await.unwrap();
        assert!(!files.exists("doc_1.pdf").await);
        files.remove("doc_1.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = ReceiptFiles::open(dir.path()).await.unwrap();
        assert!(!files.exists("nope.pdf").await);
        assert!(files.read("nope.pdf").await.is_err());
    }
}
