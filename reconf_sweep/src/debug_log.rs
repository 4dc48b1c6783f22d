//! Ephemeral per-trial debug log.

use reconf_env::SweepError;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the debug log, both ephemeral and relocated.
pub const DEBUG_FILE: &str = "debug.txt";

/// Location of one trial's debug log.
#[derive(Debug, Clone)]
pub struct DebugLog {
    path: PathBuf,
}

impl DebugLog {
    /// Debug log living in `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(DEBUG_FILE),
        }
    }

    /// Ephemeral path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the log has been created.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Creates (truncating) the log and returns a buffered sink over it.
    pub fn create(&self) -> Result<BufWriter<File>, SweepError> {
        let file = File::create(&self.path).map_err(|e| SweepError::io(&self.path, e))?;
        Ok(BufWriter::new(file))
    }

    /// Moves the log into `results_dir` and deletes the ephemeral copy.
    ///
    /// Returns the relocated path, or `None` when no log was ever created.
    pub fn relocate(&self, results_dir: &Path) -> Result<Option<PathBuf>, SweepError> {
        if !self.exists() {
            return Ok(None);
        }
        std::fs::create_dir_all(results_dir).map_err(|e| SweepError::io(results_dir, e))?;
        let target = results_dir.join(DEBUG_FILE);
        std::fs::copy(&self.path, &target).map_err(|e| SweepError::io(&target, e))?;
        std::fs::remove_file(&self.path).map_err(|e| SweepError::io(&self.path, e))?;
        debug!("relocated {} to {}", self.path.display(), target.display());
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_relocate_moves_log() {
        let scratch = tempfile::tempdir().unwrap();
        let results = tempfile::tempdir().unwrap();
        let log = DebugLog::in_dir(scratch.path());

        let mut sink = log.create().unwrap();
        writeln!(sink, "hello").unwrap();
        drop(sink);

        let moved = log.relocate(results.path()).unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(&moved).unwrap(), "hello\n");
        assert!(!log.exists());
    }

    #[test]
    fn test_relocate_without_log_is_noop() {
        let scratch = tempfile::tempdir().unwrap();
        let results = tempfile::tempdir().unwrap();
        let log = DebugLog::in_dir(scratch.path());
        assert_eq!(log.relocate(results.path()).unwrap(), None);
        assert!(!results.path().join(DEBUG_FILE).exists());
    }
}
