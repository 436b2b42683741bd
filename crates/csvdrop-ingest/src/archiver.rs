//! Moving processed files out of the watch directory

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Moves files into a destination directory without ever overwriting
///
/// Used both for the archive (successful loads) and the optional
/// quarantine (malformed files).
#[derive(Debug, Clone)]
pub struct FileArchiver {
    dir: PathBuf,
}

impl FileArchiver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `dir/basename(source)`
    pub fn destination_for(&self, source: &Path) -> Result<PathBuf> {
        let name = source.file_name().ok_or_else(|| {
            IngestError::archive(source, &self.dir, "source path has no file name")
        })?;
        Ok(self.dir.join(name))
    }

    /// Move `source` into the directory and return its new path
    ///
    /// Fails with an archive error when the destination already exists; the
    /// source is left where it was.
    pub async fn finalize(&self, source: &Path) -> Result<PathBuf> {
        let destination = self.destination_for(source)?;
        let src = source.to_path_buf();
        let dst = destination.clone();

        tokio::task::spawn_blocking(move || move_no_clobber(&src, &dst))
            .await
            .map_err(|e| IngestError::archive(source, &destination, e))?
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound if !source.exists() => IngestError::FileVanished {
                    path: source.to_path_buf(),
                },
                ErrorKind::AlreadyExists => IngestError::archive(
                    source,
                    &destination,
                    "a file with that name already exists in the destination",
                ),
                _ => IngestError::archive(source, &destination, e),
            })?;

        debug!(from = %source.display(), to = %destination.display(), "Moved file");
        Ok(destination)
    }
}

/// Link-then-unlink move that refuses to replace an existing destination
///
/// Falls back to an exclusive-create copy when hard links are not possible,
/// e.g. across filesystems.
fn move_no_clobber(source: &Path, destination: &Path) -> io::Result<()> {
    match std::fs::hard_link(source, destination) {
        Ok(()) => remove_source(source, destination),
        Err(e) if matches!(e.kind(), ErrorKind::AlreadyExists | ErrorKind::NotFound) => Err(e),
        Err(e) => {
            debug!(error = %e, "Hard link unavailable, copying instead");
            copy_exclusive(source, destination)?;
            remove_source(source, destination)
        }
    }
}

fn copy_exclusive(source: &Path, destination: &Path) -> io::Result<()> {
    let mut reader = std::fs::File::open(source)?;
    let mut writer = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)?;

    let copied = io::copy(&mut reader, &mut writer).and_then(|_| writer.sync_all());
    if let Err(e) = copied {
        drop(writer);
        let _ = std::fs::remove_file(destination);
        return Err(e);
    }
    Ok(())
}

/// Remove the source once the destination holds the data, undoing the
/// destination if the source cannot be removed
fn remove_source(source: &Path, destination: &Path) -> io::Result<()> {
    if let Err(e) = std::fs::remove_file(source) {
        warn!(
            source = %source.display(),
            error = %e,
            "Could not remove source after move, rolling back destination"
        );
        let _ = std::fs::remove_file(destination);
        return Err(e);
    }
    Ok(())
}
