use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::job::JobRecord;
use crate::settings::Settings;

/// Durable home of the download history and the settings. Both values are
/// always read and written as a whole.
pub trait Store: Send {
    fn history(&self) -> Vec<JobRecord>;
    fn replace_history(&mut self, jobs: Vec<JobRecord>) -> Result<(), StoreError>;
    fn settings(&self) -> Settings;
    fn replace_settings(&mut self, settings: Settings) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Document {
    downloads: Vec<JobRecord>,
    settings: Settings,
}

/// A json document on disk, rewritten through a temporary file on every change
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    doc: Document,
}

impl JsonFileStore {
    /// Loads the document at `path`, starting from defaults when it does not
    /// exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let bytes = serde_json::to_vec_pretty(&self.doc).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, bytes).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl Store for JsonFileStore {
    fn history(&self) -> Vec<JobRecord> {
        self.doc.downloads.clone()
    }
    fn replace_history(&mut self, jobs: Vec<JobRecord>) -> Result<(), StoreError> {
        self.doc.downloads = jobs;
        self.flush()
    }
    fn settings(&self) -> Settings {
        self.doc.settings.clone()
    }
    fn replace_settings(&mut self, settings: Settings) -> Result<(), StoreError> {
        self.doc.settings = settings;
        self.flush()
    }
}

/// Keeps everything in memory. Used when no state file is wanted.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    doc: Document,
}

impl MemoryStore {
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            doc: Document {
                downloads: Vec::new(),
                settings,
            },
        }
    }
}

impl Store for MemoryStore {
    fn history(&self) -> Vec<JobRecord> {
        self.doc.downloads.clone()
    }
    fn replace_history(&mut self, jobs: Vec<JobRecord>) -> Result<(), StoreError> {
        self.doc.downloads = jobs;
        Ok(())
    }
    fn settings(&self) -> Settings {
        self.doc.settings.clone()
    }
    fn replace_settings(&mut self, settings: Settings) -> Result<(), StoreError> {
        self.doc.settings = settings;
        Ok(())
    }
}

#[cfg(test)]
mod checks {
    use super::*;
    use crate::job::{JobRecord, JobStatus};
    use crate::settings::Format;

    fn job(id: &str) -> JobRecord {
        JobRecord::new(
            id.into(),
            "https://vimeo.com/1".into(),
            Some("clip".into()),
            None,
            Format::Video,
            chrono::Utc::now(),
        )
    }

    #[test]
    fn check_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();
        assert!(store.history().is_empty());
        assert_eq!(store.settings(), Settings::default());
    }
    #[test]
    fn check_reopen_sees_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut store = JsonFileStore::open(&path).unwrap();
        let mut j = job("42");
        j.status = JobStatus::Complete;
        store.replace_history(vec![j.clone()]).unwrap();
        let mut settings = store.settings();
        settings.audio_quality = "320".into();
        store.replace_settings(settings).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.history(), vec![j]);
        assert_eq!(store.settings().audio_quality, "320");
        assert!(!path.with_extension("json.tmp").exists());
    }
    #[test]
    fn check_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Json { .. })
        ));
    }
    #[test]
    fn check_reads_existing_document_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let doc = r#"{
            "downloads": [{
                "id": "1700000000000", "url": "https://youtu.be/x", "title": "t",
                "thumbnail": null, "platform": "YouTube", "format": "mp3",
                "status": "complete", "progress": 100, "filePath": "/tmp/t.mp3",
                "createdAt": "2024-01-01T00:00:00.000Z", "error": null
            }],
            "settings": {"outputDir": "/tmp", "downloadFormat": "mp3",
                "audioQuality": "192", "videoQuality": "best",
                "showSplash": true, "minimizeToTray": true}
        }"#;
        std::fs::write(&path, doc).unwrap();
        let store = JsonFileStore::open(&path).unwrap();
        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].format, Format::Audio);
        assert_eq!(history[0].status, JobStatus::Complete);
        assert_eq!(store.settings().output_dir, PathBuf::from("/tmp"));
    }
}
