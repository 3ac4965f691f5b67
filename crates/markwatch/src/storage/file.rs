use std::path::{Path, PathBuf};

use super::KeyValueStore;
use crate::error::StorageError;

/// One JSON file per key inside a directory.
///
/// Writes go to a temporary sibling first and are moved into place with
/// `rename`, so a crash mid-write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.json", sanitize_key(key)))
    }

    fn ensure_directory(&self) -> Result<(), StorageError> {
        if !self.directory.exists() {
            std::fs::create_dir_all(&self.directory).map_err(|e| {
                StorageError::CreateDirectory {
                    path: self.directory.clone(),
                    source: e,
                }
            })?;
        }
        Ok(())
    }
}

/// Maps an arbitrary key onto a portable filename.
///
/// ASCII alphanumerics, `-` and non-leading `.` pass through; every other
/// byte (including `_`) becomes `_XX` in hex, so distinct keys never share
/// a file.
fn sanitize_key(key: &str) -> String {
    if key.is_empty() {
        return "_".to_string();
    }
    let mut encoded = String::with_capacity(key.len());
    for (i, byte) in key.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'-' || (byte == b'.' && i > 0);
        if keep {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{:02X}", byte));
        }
    }
    encoded
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::ReadFile { path, source: e }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.ensure_directory()?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));

        std::fs::write(&tmp_path, value).map_err(|e| StorageError::WriteFile {
            path: tmp_path.clone(),
            source: e,
        })?;

        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(StorageError::WriteFile { path, source: e });
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFile { path, source: e }),
        }
    }
}
