use std::path::{Path, PathBuf};

use learner::{Checkpoint, HookErr, ModelState};
use log::debug;

use crate::model::{save as save_model, save_text};

/// Persists the learner's weights through the run.
///
/// Pass snapshots go to `<path>.<pass>` when enabled, the final model goes to
/// `path` and optionally to a readable dump.
#[derive(Debug, Clone)]
pub struct ModelWriter {
    path: Option<PathBuf>,
    readable: Option<PathBuf>,
    options: String,
    per_pass: bool,
}

impl ModelWriter {
    /// Creates a new `ModelWriter`.
    ///
    /// # Arguments
    /// * `path` - Where the final binary model goes, if anywhere.
    /// * `readable` - Where the final text dump goes, if anywhere.
    /// * `options` - Description of the run stored in the header.
    pub fn new(path: Option<PathBuf>, readable: Option<PathBuf>, options: impl Into<String>) -> Self {
        Self {
            path,
            readable,
            options: options.into(),
            per_pass: false,
        }
    }

    /// Also writes a snapshot at every pass boundary.
    pub fn per_pass(mut self, per_pass: bool) -> Self {
        self.per_pass = per_pass;
        self
    }

    fn pass_path(path: &Path, pass: usize) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{pass}"));
        name.into()
    }
}

impl Checkpoint for ModelWriter {
    fn save(&mut self, model: &ModelState<'_>, pass: usize) -> Result<(), HookErr> {
        let Some(path) = self.path.as_deref().filter(|_| self.per_pass) else {
            return Ok(());
        };

        let path = Self::pass_path(path, pass);
        debug!(pass = pass; "saving pass snapshot");
        save_model(&path, model, &self.options)?;
        Ok(())
    }

    fn finalize(&mut self, model: &ModelState<'_>) -> Result<(), HookErr> {
        if let Some(path) = &self.path {
            save_model(path, model, &self.options)?;
        }
        if let Some(path) = &self.readable {
            save_text(path, model, &self.options)?;
        }
        Ok(())
    }
}
