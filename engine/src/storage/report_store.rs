//! Generated report storage
//!
//! Keeps report files in a single directory under the data dir. Names are
//! sanitized so a titular can never escape the root, and writes go through a
//! temp file plus rename so a half-written report is never picked up by the
//! send pipeline.

use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Directory of generated report files
#[derive(Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Initialize the report store (create directory if needed)
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Report store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Write a report under `name`, replacing any previous file, and return its path
    pub async fn write(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(name)?;

        fs::create_dir_all(&self.root).await?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        fs::rename(temp_path, &path).await?;

        tracing::debug!("Wrote report: {:?} ({} bytes)", path, data.len());

        Ok(path)
    }

    /// Check that a recorded report path points at an existing file
    pub async fn exists(&self, path: &str) -> bool {
        fs::metadata(self.resolve(path))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// Recorded report paths may be absolute or relative to the root
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path.trim());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Path a report named `name` is stored at
    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(AppError::ReportStore(format!(
                "Invalid report name: {:?}",
                name
            )));
        }

        Ok(self.root.join(name))
    }

    /// Get report store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Turn free text (a titular) into a file-name fragment
pub fn file_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_sep = true;

    for c in text.trim().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }

    while slug.ends_with('_') {
        slug.pop();
    }

    if slug.is_empty() {
        "sin_titular".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (ReportStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = ReportStore::new(temp_dir.path().join("reports"));
        store.initialize().await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_write_and_exists() {
        let (store, _temp) = create_test_store().await;

        let path = store.write("Reporte_Acme.txt", b"contenido").await.unwrap();

        assert!(store.exists(path.to_str().unwrap()).await);
        assert!(store.exists("Reporte_Acme.txt").await);
        assert!(!store.exists("Reporte_Otro.txt").await);
        assert_eq!(std::fs::read(&path).unwrap(), b"contenido");
    }

    #[tokio::test]
    async fn test_write_replaces_previous_content() {
        let (store, _temp) = create_test_store().await;

        store.write("r.txt", b"first").await.unwrap();
        let path = store.write("r.txt", b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_report() {
        let (store, _temp) = create_test_store().await;

        assert!(!store.exists(store.root().to_str().unwrap()).await);
    }

    #[test]
    fn test_path_for_rejects_traversal() {
        let store = ReportStore::new(PathBuf::from("/data/reports"));

        assert!(store.path_for("../secrets").is_err());
        assert!(store.path_for("a/b.txt").is_err());
        assert!(store.path_for("   ").is_err());
        assert_eq!(
            store.path_for("ok.txt").unwrap(),
            PathBuf::from("/data/reports/ok.txt")
        );
    }

    #[test]
    fn test_file_slug() {
        assert_eq!(file_slug("Acme Corp"), "Acme_Corp");
        assert_eq!(file_slug("  Beta, LLC. "), "Beta_LLC");
        assert_eq!(file_slug("Industrias Ñandú S.A."), "Industrias_Ñandú_S_A");
        assert_eq!(file_slug("///"), "sin_titular");
    }
}
