//! All-or-nothing publication of run outputs.
//!
//! Each output is written to a temporary sibling and fsynced. Only after every
//! output is staged are the temporaries renamed into place; a publisher that
//! is dropped without committing removes its temporaries and leaves the
//! previously published files untouched.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ConfigError;

#[derive(Debug)]
struct Staged {
    temp_path: PathBuf,
    final_path: PathBuf,
}

/// Stages outputs and publishes them together.
#[derive(Debug, Default)]
pub struct Publisher {
    staged: Vec<Staged>,
}

fn temp_sibling(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{name}.tmp.{}", Uuid::new_v4()))
}

impl Publisher {
    /// Creates an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of staged outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Returns true if nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Writes one output to a temporary sibling of `final_path`.
    pub fn stage<F>(&mut self, final_path: &Path, write: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut BufWriter<File>) -> Result<(), ConfigError>,
    {
        if let Some(parent) = final_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ConfigError::io(parent, e))?;
        }
        let temp_path = temp_sibling(final_path);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| ConfigError::io(&temp_path, e))?;
        // Registered before writing so a failed write is still cleaned up.
        self.staged.push(Staged {
            temp_path: temp_path.clone(),
            final_path: final_path.to_path_buf(),
        });

        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.flush().map_err(|e| ConfigError::io(&temp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| ConfigError::io(&temp_path, e))?;
        debug!(path = %final_path.display(), "staged output");
        Ok(())
    }

    /// Renames every staged output into place.
    pub fn commit(mut self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut published = Vec::with_capacity(self.staged.len());
        while !self.staged.is_empty() {
            let staged = self.staged.remove(0);
            fs::rename(&staged.temp_path, &staged.final_path)
                .map_err(|e| ConfigError::io(&staged.final_path, e))?;
            published.push(staged.final_path);
        }
        info!(outputs = published.len(), "published outputs");
        Ok(published)
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        for staged in self.staged.drain(..) {
            if staged.temp_path.exists() {
                if let Err(e) = fs::remove_file(&staged.temp_path) {
                    warn!(path = %staged.temp_path.display(), error = %e, "failed to remove staged output");
                }
            }
        }
    }
}
