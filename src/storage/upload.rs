//! Pushes a finished session directory to blob storage.
//!
//! Every file is uploaded independently. A file is deleted locally only
//! after its upload succeeded; failed files stay for a later pass. The
//! directory itself goes away only once it is empty.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::{recording_key, BlobStore};

/// Outcome of one file's upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub path: PathBuf,
    pub key: String,
    pub uploaded: bool,
}

/// Observability summary of an upload pass. Nothing in the recording flow
/// waits for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub files: Vec<FileUpload>,
    pub directory_removed: bool,
}

impl UploadReport {
    pub fn uploaded(&self) -> usize {
        self.files.iter().filter(|f| f.uploaded).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.uploaded()
    }
}

#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn BlobStore>,
    extension: String,
    max_concurrency: usize,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn BlobStore>, extension: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            store,
            extension: extension.into(),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Upload every matching file in `directory`, then try to remove it.
    /// Failures are logged, never returned.
    pub async fn upload(&self, directory: &Path) -> UploadReport {
        let mut report = UploadReport::default();

        let files = match self.list_files(directory).await {
            Ok(files) => files,
            Err(e) => {
                error!("Failed to read directory {:?}: {}", directory, e);
                return report;
            }
        };

        let channel_id = directory
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for path in files {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let key = recording_key(&channel_id, &file_name);
            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let uploaded = upload_file(store.as_ref(), &path, &key).await;
                FileUpload {
                    path,
                    key,
                    uploaded,
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(file) => report.files.push(file),
                Err(e) => error!("Upload task panicked: {}", e),
            }
        }
        report.files.sort_by(|a, b| a.path.cmp(&b.path));

        report.directory_removed = match remove_empty_dir(directory).await {
            Ok(()) => {
                debug!("Removed recording directory {:?}", directory);
                true
            }
            Err(DirCleanup::NotEmpty) => {
                info!(
                    "Some files in {:?} were not sent to cloud storage, keeping directory",
                    directory
                );
                false
            }
            Err(DirCleanup::Io(e)) => {
                error!("Failed to remove directory {:?}: {}", directory, e);
                false
            }
        };

        info!(
            "Upload pass for {:?} finished: {} uploaded, {} failed",
            directory,
            report.uploaded(),
            report.failed()
        );
        report
    }

    async fn list_files(&self, directory: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(directory).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(self.extension.as_str()) {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }
}

/// Returns whether the upload itself succeeded. A failed local delete after
/// a successful upload is logged but still counts as uploaded.
async fn upload_file(store: &dyn BlobStore, path: &Path, key: &str) -> bool {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            error!("Failed to read {:?}: {}", path, e);
            return false;
        }
    };

    if let Err(e) = store.put(data, key).await {
        error!("Failed to save {:?} to cloud storage: {}", path, e);
        return false;
    }

    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Uploaded {} but failed to remove local file: {}", key, e);
    } else {
        info!("Record sent successfully: {}", key);
    }
    true
}

enum DirCleanup {
    NotEmpty,
    Io(std::io::Error),
}

async fn remove_empty_dir(directory: &Path) -> Result<(), DirCleanup> {
    let mut entries = tokio::fs::read_dir(directory).await.map_err(DirCleanup::Io)?;
    if entries.next_entry().await.map_err(DirCleanup::Io)?.is_some() {
        return Err(DirCleanup::NotEmpty);
    }

    tokio::fs::remove_dir(directory).await.map_err(DirCleanup::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::ListPage;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        reject: Vec<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for MemoryStore {
        async fn put(&self, data: Vec<u8>, key: &str) -> Result<(), StorageError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.reject.iter().any(|k| k == key) {
                return Err(StorageError::Backend("access denied".to_string()));
            }
            self.objects.lock().unwrap().insert(key.to_string(), data);
            Ok(())
        }

        async fn list_page(
            &self,
            _prefix: &str,
            _continuation: Option<&str>,
        ) -> Result<ListPage, StorageError> {
            Ok(ListPage::default())
        }

        async fn presign(&self, key: &str, _validity: Duration) -> Result<String, StorageError> {
            Ok(key.to_string())
        }
    }

    fn session_dir(files: &[&str]) -> (tempfile::TempDir, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("777");
        std::fs::create_dir_all(&dir).unwrap();
        for name in files {
            std::fs::write(dir.join(name), name.as_bytes()).unwrap();
        }
        (root, dir)
    }

    #[tokio::test]
    async fn test_all_uploaded_removes_directory() {
        let (_root, dir) = session_dir(&["1.wav", "2.wav"]);
        let store = Arc::new(MemoryStore::default());
        let pipeline = UploadPipeline::new(store.clone(), "wav", 4);

        let report = pipeline.upload(&dir).await;

        assert_eq!(report.uploaded(), 2);
        assert!(report.directory_removed);
        assert!(!dir.exists());
        let objects = store.objects.lock().unwrap();
        assert_eq!(objects["records/777/1.wav"], b"1.wav".to_vec());
        assert!(objects.contains_key("records/777/2.wav"));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_failed_file_and_directory() {
        let (_root, dir) = session_dir(&["1.wav", "2.wav", "3.wav"]);
        let store = Arc::new(MemoryStore {
            reject: vec!["records/777/2.wav".to_string()],
            ..Default::default()
        });
        let pipeline = UploadPipeline::new(store.clone(), "wav", 4);

        let report = pipeline.upload(&dir).await;

        assert_eq!(report.uploaded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(!report.directory_removed);
        assert!(dir.exists());
        assert!(!dir.join("1.wav").exists());
        assert!(dir.join("2.wav").exists());
        assert!(!dir.join("3.wav").exists());
    }

    #[tokio::test]
    async fn test_only_matching_extension_is_uploaded() {
        let (_root, dir) = session_dir(&["1.wav", "notes.txt"]);
        let store = Arc::new(MemoryStore::default());
        let pipeline = UploadPipeline::new(store.clone(), "wav", 4);

        let report = pipeline.upload(&dir).await;

        assert_eq!(report.files.len(), 1);
        assert!(dir.join("notes.txt").exists());
        // The stray file keeps the directory alive
        assert!(!report.directory_removed);
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded() {
        let names: Vec<String> = (0..12).map(|i| format!("{i}.wav")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (_root, dir) = session_dir(&refs);
        let store = Arc::new(MemoryStore::default());
        let pipeline = UploadPipeline::new(store.clone(), "wav", 3);

        let report = pipeline.upload(&dir).await;

        assert_eq!(report.uploaded(), 12);
        assert!(store.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_missing_directory_is_logged_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let pipeline = UploadPipeline::new(Arc::new(MemoryStore::default()), "wav", 2);

        let report = pipeline.upload(&root.path().join("gone")).await;

        assert!(report.files.is_empty());
        assert!(!report.directory_removed);
    }
}
