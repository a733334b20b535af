//! Filesystem note store using tokio::fs.
//!
//! Layout under the data directory:
//! - `notes/<id>.hypn`: active containers
//! - `trash/<id>.hypn`: trashed containers

use async_trait::async_trait;
use hypernote_core::store::{ContainerEntry, NoteStore, Result, StoreError};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tokio::fs;
use tracing::debug;

pub const CONTAINER_EXTENSION: &str = "hypn";

const NOTES_DIR: &str = "notes";
const TRASH_DIR: &str = "trash";

/// One container file per note.
pub struct FsNoteStore {
    notes_dir: PathBuf,
    trash_dir: PathBuf,
}

impl FsNoteStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            notes_dir: data_dir.join(NOTES_DIR),
            trash_dir: data_dir.join(TRASH_DIR),
        }
    }

    /// Like `new`, but creates both directories up front.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let store = Self::new(data_dir);
        fs::create_dir_all(&store.notes_dir).await.map_err(io_error)?;
        fs::create_dir_all(&store.trash_dir).await.map_err(io_error)?;
        Ok(store)
    }

    pub fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    pub fn trash_dir(&self) -> &Path {
        &self.trash_dir
    }

    fn note_path(dir: &Path, note_id: &str) -> Result<PathBuf> {
        validate_id(note_id)?;
        Ok(dir.join(format!("{note_id}.{CONTAINER_EXTENSION}")))
    }

    async fn list_dir(dir: &Path) -> Result<Vec<ContainerEntry>> {
        let mut dir_entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir_entries.next_entry().await.map_err(io_error)? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = name.strip_suffix(&format!(".{CONTAINER_EXTENSION}")) else {
                continue;
            };
            if validate_id(id).is_err() {
                debug!("Ignoring unexpected file {:?} in {:?}", name, dir);
                continue;
            }
            names.push(id.to_string());
        }
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for id in names {
            let path = dir.join(format!("{id}.{CONTAINER_EXTENSION}"));
            match fs::read(&path).await {
                Ok(bytes) => entries.push(ContainerEntry::new(id, bytes)),
                // Removed between listing and reading
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(e)),
            }
        }
        Ok(entries)
    }

    async fn move_file(from: &Path, to: &Path, note_id: &str) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        fs::rename(from, to)
            .await
            .map_err(|e| not_found_or_io(e, note_id))
    }
}

#[async_trait]
impl NoteStore for FsNoteStore {
    async fn list_containers(&self) -> Result<Vec<ContainerEntry>> {
        Self::list_dir(&self.notes_dir).await
    }

    async fn read_container(&self, note_id: &str) -> Result<Vec<u8>> {
        let path = Self::note_path(&self.notes_dir, note_id)?;
        fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, note_id))
    }

    async fn write_container(&self, note_id: &str, bytes: &[u8]) -> Result<()> {
        let path = Self::note_path(&self.notes_dir, note_id)?;
        fs::create_dir_all(&self.notes_dir).await.map_err(io_error)?;

        // Readers never see a half written container. Each write gets its
        // own temp file, so overlapping writes of one id cannot interleave.
        let dir = self.notes_dir.clone();
        let prefix = format!(".{note_id}.");
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut tmp = Builder::new().prefix(&prefix).suffix(".tmp").tempfile_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?
        .map_err(io_error)
    }

    async fn move_container_to_trash(&self, note_id: &str) -> Result<()> {
        let from = Self::note_path(&self.notes_dir, note_id)?;
        let to = Self::note_path(&self.trash_dir, note_id)?;
        Self::move_file(&from, &to, note_id).await
    }

    async fn list_trash_containers(&self) -> Result<Vec<ContainerEntry>> {
        Self::list_dir(&self.trash_dir).await
    }

    async fn permanent_delete_from_trash(&self, note_id: &str) -> Result<()> {
        let path = Self::note_path(&self.trash_dir, note_id)?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(e, note_id))
    }

    async fn restore_from_trash(&self, note_id: &str) -> Result<()> {
        let from = Self::note_path(&self.trash_dir, note_id)?;
        let to = Self::note_path(&self.notes_dir, note_id)?;
        Self::move_file(&from, &to, note_id).await
    }
}

/// Ids become file names: ASCII alphanumerics plus `-`, `_` and `.`, not
/// starting with a dot.
fn validate_id(note_id: &str) -> Result<()> {
    let valid = !note_id.is_empty()
        && !note_id.starts_with('.')
        && note_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(note_id.to_string()))
    }
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

fn not_found_or_io(e: std::io::Error, note_id: &str) -> StoreError {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(note_id.to_string())
    } else {
        io_error(e)
    }
}
