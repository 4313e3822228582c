use std::path::{Path, PathBuf};

use crate::foundation::error::{EngineResult, ExportError};

/// A committed output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportResult {
    pub path: PathBuf,
    pub byte_size: u64,
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| ExportError::io(parent, e))?;
    }
    Ok(())
}

/// Temporary file next to a destination, deleted on drop unless committed.
#[derive(Debug)]
pub struct StagedOutput {
    destination: PathBuf,
    temp: PathBuf,
    committed: bool,
}

impl StagedOutput {
    pub fn new(destination: impl Into<PathBuf>) -> Result<Self, ExportError> {
        let destination = destination.into();
        let name = destination
            .file_name()
            .ok_or_else(|| {
                ExportError::io(
                    &destination,
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "destination has no file name",
                    ),
                )
            })?
            .to_string_lossy()
            .into_owned();
        ensure_parent_dir(&destination)?;

        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp = destination.with_file_name(format!(
            ".{name}.{}.{nanos}.part",
            std::process::id()
        ));
        Ok(Self {
            destination,
            temp,
            committed: false,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Rename the finished temporary file over the destination.
    pub fn commit(mut self) -> Result<ExportResult, ExportError> {
        let byte_size = std::fs::metadata(&self.temp)
            .map_err(|e| ExportError::io(&self.temp, e))?
            .len();
        std::fs::rename(&self.temp, &self.destination)
            .map_err(|e| ExportError::io(&self.destination, e))?;
        self.committed = true;
        tracing::debug!(
            path = %self.destination.display(),
            byte_size,
            "output committed"
        );
        Ok(ExportResult {
            path: self.destination.clone(),
            byte_size,
        })
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.temp) {
            Ok(()) => tracing::debug!(path = %self.temp.display(), "discarded staged output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                path = %self.temp.display(),
                error = %e,
                "failed to remove staged output"
            ),
        }
    }
}

/// Let `write` produce the complete file at a staged path, then commit it to `destination`.
///
/// If `write` fails the staged file is removed and the destination is left untouched.
pub fn finalize_with<F>(destination: &Path, write: F) -> EngineResult<ExportResult>
where
    F: FnOnce(&Path) -> EngineResult<()>,
{
    let staged = StagedOutput::new(destination)?;
    write(staged.temp_path())?;
    Ok(staged.commit()?)
}

#[cfg(test)]
#[path = "../../tests/unit/export/staging.rs"]
mod tests;
