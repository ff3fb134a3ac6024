use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use tracing::debug;

use crate::{result::Result, types::MediaRole};

const TEMP_PREFIX: &str = "vidsplice-";

/// Create a named temporary file in the directory and return its handle.
///
/// The file destructor will be called at the handle drop.
/// **As such, one must not simply get the file path and drop the handle.**
pub fn named_tempfile_in(dir: &Path, role: MediaRole) -> Result<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(&format!("{TEMP_PREFIX}{}-", role.stem()))
        .suffix(role.extension().with_dot())
        .tempfile_in(dir)?)
}

/// The directory holding every intermediate file of a single clip-and-merge request.
///
/// The directory name is random, so that concurrent requests cannot step on each other.
/// It is removed with all its content when the workspace is closed or dropped.
#[derive(Debug)]
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    pub fn create(root: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{TEMP_PREFIX}work-"))
            .tempdir_in(root)?;
        debug!("Created scratch workspace {}", dir.path().display());

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn clip_path(&self, section_id: i64) -> PathBuf {
        self.path().join(MediaRole::Clip.file_name(Some(section_id)))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path().join(MediaRole::Manifest.file_name(None))
    }

    pub fn merged_path(&self) -> PathBuf {
        self.path().join(MediaRole::Merged.file_name(None))
    }

    /// Remove the workspace and its content.
    ///
    /// Failures are only logged: the files may already be gone.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(err) = self.dir.close() {
            debug!("Could not remove scratch workspace {}: {err}", path.display());
        }
    }
}

/// Delete a temporary file, logging instead of failing.
pub fn discard(file: NamedTempFile) {
    let path = file.path().to_path_buf();
    if let Err(err) = file.close() {
        debug!("Could not remove temporary file {}: {err}", path.display());
    }
}
