//! Flat directory of media files that streams can be started from.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{StreamError, StreamResult};

pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "flv", "mkv", "mov", "avi"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct MediaLibrary {
    dir: PathBuf,
}

impl MediaLibrary {
    pub fn open(dir: impl Into<PathBuf>) -> StreamResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("Media library at {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Media files directly inside the library, sorted by name.
    pub fn list(&self) -> StreamResult<Vec<MediaFile>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if is_media_name(&name) {
                files.push(MediaFile {
                    name,
                    size: metadata.len(),
                });
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Path of a listed file. Rejects anything that could escape the library.
    pub fn resolve(&self, name: &str) -> StreamResult<PathBuf> {
        let name = checked_name(name)?;
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(StreamError::not_found(format!("video {name}")));
        }
        Ok(path)
    }

    /// Opens `<name>.part` for an upload, keeping only the final path
    /// component of `name`. [`PendingUpload::finish`] moves it into place,
    /// replacing any file with the same name.
    pub async fn begin_upload(&self, name: &str) -> StreamResult<PendingUpload> {
        let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
        let base = checked_name(base)?;
        if !is_media_name(base) {
            return Err(StreamError::invalid_input(format!(
                "{base} is not a supported video ({})",
                MEDIA_EXTENSIONS.join(", ")
            )));
        }

        let part = self.dir.join(format!("{base}.part"));
        let file = File::create(&part).await?;
        Ok(PendingUpload {
            name: base.to_string(),
            path: self.dir.join(base),
            part,
            file: Some(file),
            size: 0,
            committed: false,
        })
    }
}

/// An upload being written to its `.part` file. Dropping it before
/// [`finish`](Self::finish) succeeds removes the partial file.
#[derive(Debug)]
pub struct PendingUpload {
    name: String,
    path: PathBuf,
    part: PathBuf,
    file: Option<File>,
    size: u64,
    committed: bool,
}

impl PendingUpload {
    pub async fn write(&mut self, chunk: &[u8]) -> StreamResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(StreamError::Conflict(format!(
                "upload {} is already finished",
                self.name
            )));
        };
        file.write_all(chunk).await?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    pub async fn finish(mut self) -> StreamResult<MediaFile> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.part, &self.path).await?;
        self.committed = true;
        info!("Stored upload {} ({} bytes)", self.path.display(), self.size);

        Ok(MediaFile {
            name: self.name.clone(),
            size: self.size,
        })
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.file.take();
        if let Err(err) = fs::remove_file(&self.part)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!("Could not remove {}: {err}", self.part.display());
        }
    }
}

fn checked_name(name: &str) -> StreamResult<&str> {
    let name = name.trim();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0')
    {
        return Err(StreamError::invalid_input(format!("invalid video name {name:?}")));
    }
    Ok(name)
}

fn is_media_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
