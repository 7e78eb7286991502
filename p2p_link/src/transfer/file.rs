use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use uuid::Uuid;

use super::envelope::FileInfo;
use crate::error::Result;

/// A file chosen for sending: its identity plus the full contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFile {
    pub info: FileInfo,
    pub data: Bytes,
}

impl TransferFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            info: FileInfo {
                name: name.into(),
                size: data.len() as u64,
                last_modified: None,
                mime_type: mime_type.into(),
                file_id: Uuid::new_v4().to_string(),
            },
            data,
        }
    }

    /// Reads a file from disk. The mime type is left empty.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let metadata = tokio::fs::metadata(path).await?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as u64);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown_file".to_string());

        let mut file = Self::new(name, String::new(), data);
        file.info.last_modified = last_modified;
        Ok(file)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A user-facing file picker: a named, shared selection of files that every
/// link it is attached to can read from.
#[derive(Debug, Clone)]
pub struct FileInput {
    id: String,
    selection: Arc<RwLock<Vec<TransferFile>>>,
}

impl FileInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selection: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn choose(&self, files: Vec<TransferFile>) {
        let mut selection = self.selection.write().unwrap_or_else(|e| e.into_inner());
        *selection = files;
    }

    pub fn selected(&self) -> Vec<TransferFile> {
        self.selection
            .read()
            .map(|files| files.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_info() {
        let file = TransferFile::new("notes.txt", "text/plain", b"hello".to_vec());
        assert_eq!(file.info.size, 5);
        assert_eq!(file.info.name, "notes.txt");
        assert!(Uuid::parse_str(&file.info.file_id).is_ok());

        let other = TransferFile::new("notes.txt", "text/plain", b"hello".to_vec());
        assert_ne!(file.info.file_id, other.info.file_id);
    }

    #[test]
    fn test_file_input_selection_is_shared() {
        let input = FileInput::new("picker");
        let attached = input.clone();
        input.choose(vec![TransferFile::new("a.bin", "", vec![1u8, 2, 3])]);

        assert_eq!(attached.selected().len(), 1);
        assert_eq!(attached.id(), "picker");
    }

    #[tokio::test]
    async fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        tokio::fs::write(&path, vec![7u8; 2048]).await.unwrap();

        let file = TransferFile::from_path(&path).await.unwrap();
        assert_eq!(file.info.name, "photo.jpg");
        assert_eq!(file.info.size, 2048);
        assert!(file.info.last_modified.is_some());
    }
}
