//! Per-trial shared synchronization segment.
//!
//! Segments are files in `/dev/shm` (or the temp dir where that does not
//! exist), one byte per node, mapped shared into the address space. Names
//! combine the process id, a process-wide counter and a nanosecond
//! timestamp, and the file is created with `create_new`, so a collision with
//! a concurrently active trial fails loudly instead of sharing memory.

use memmap2::MmapMut;
use reconf_env::{SweepError, SyncRegion};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

static SEGMENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Prefix of every segment name.
pub const SEGMENT_PREFIX: &str = "shm_cps";

/// OS-backed shared segment sized to a trial's node count.
#[derive(Debug)]
pub struct SharedSegment {
    name: String,
    path: PathBuf,
    len: usize,
    map: Mutex<Option<MmapMut>>,
    unlinked: Mutex<bool>,
}

impl SharedSegment {
    /// Creates a zeroed segment with `len` slots in `dir`.
    pub fn create_in(dir: &Path, len: usize) -> Result<Self, SweepError> {
        let name = unique_name();
        let path = dir.join(&name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| SweepError::io(&path, e))?;
        // Empty mappings are rejected by the OS
        file.set_len(len.max(1) as u64)
            .map_err(|e| SweepError::io(&path, e))?;

        // SAFETY: the file was created exclusively above and is only ever
        // accessed as plain bytes, for which every value is valid.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|e| SweepError::io(&path, e))?;
        debug!("created segment {} ({} bytes)", name, len);

        Ok(Self {
            name,
            path,
            len,
            map: Mutex::new(Some(map)),
            unlinked: Mutex::new(false),
        })
    }

    /// Backing path of the segment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmaps this handle. Further reads and writes fail.
    pub fn close(&self) {
        self.map.lock().unwrap().take();
    }

    /// Removes the segment from the system.
    ///
    /// Returns `false` when it was already gone; that is logged but benign.
    pub fn unlink(&self) -> Result<bool, SweepError> {
        let mut unlinked = self.unlinked.lock().unwrap();
        *unlinked = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("unlinked segment {}", self.name);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Segment {} was already released", self.name);
                Ok(false)
            }
            Err(e) => Err(SweepError::io(&self.path, e)),
        }
    }

    /// Closes and unlinks in one go.
    pub fn release(&self) -> Result<bool, SweepError> {
        self.close();
        self.unlink()
    }

    fn with_map<T>(&self, index: usize, f: impl FnOnce(&mut MmapMut) -> T) -> Result<T, SweepError> {
        if index >= self.len {
            return Err(SweepError::invalid(format!(
                "slot {} out of range for segment {} ({} slots)",
                index, self.name, self.len
            )));
        }
        let mut guard = self.map.lock().unwrap();
        let map = guard
            .as_mut()
            .ok_or_else(|| SweepError::engine(format!("segment {} is closed", self.name)))?;
        Ok(f(map))
    }
}

impl SyncRegion for SharedSegment {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize) -> Result<u8, SweepError> {
        self.with_map(index, |map| map[index])
    }

    fn set(&self, index: usize, value: u8) -> Result<(), SweepError> {
        self.with_map(index, |map| map[index] = value)
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        self.close();
        let already = *self.unlinked.lock().unwrap();
        if !already {
            if let Err(e) = self.unlink() {
                warn!("Failed to release segment {} on drop: {}", self.name, e);
            }
        }
    }
}

/// `/dev/shm` when present, otherwise the temp dir.
pub fn default_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

fn unique_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!(
        "{}_{}_{}_{}",
        SEGMENT_PREFIX,
        std::process::id(),
        SEGMENT_COUNTER.fetch_add(1, Ordering::Relaxed),
        nanos
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_slots_start_zeroed_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let segment = SharedSegment::create_in(dir.path(), 6).unwrap();
        assert_eq!(segment.len(), 6);
        assert_eq!(segment.get(5).unwrap(), 0);

        segment.set(3, 1).unwrap();
        assert_eq!(segment.get(3).unwrap(), 1);
        assert!(segment.set(6, 1).is_err());
    }

    #[test]
    fn test_writes_visible_through_backing_file() {
        let dir = tempfile::tempdir().unwrap();
        let segment = SharedSegment::create_in(dir.path(), 4).unwrap();
        segment.set(1, 7).unwrap();
        segment.set(3, 1).unwrap();

        // Another handle on the segment, as a second process would open it
        let bytes = std::fs::read(segment.path()).unwrap();
        assert_eq!(bytes, vec![0, 7, 0, 1]);
    }

    #[test]
    fn test_release_removes_segment() {
        let dir = tempfile::tempdir().unwrap();
        let segment = SharedSegment::create_in(dir.path(), 4).unwrap();
        let path = segment.path().to_path_buf();
        assert!(path.exists());

        assert!(segment.release().unwrap());
        assert!(!path.exists());
        assert!(segment.get(0).is_err());
    }

    #[test]
    fn test_unlink_twice_is_benign() {
        let dir = tempfile::tempdir().unwrap();
        let segment = SharedSegment::create_in(dir.path(), 4).unwrap();
        std::fs::remove_file(segment.path()).unwrap();
        assert!(!segment.release().unwrap());
    }

    #[test]
    fn test_drop_releases_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let segment = SharedSegment::create_in(dir.path(), 4).unwrap();
            segment.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_names_unique_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let names: HashSet<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let dir = dir.path();
                    scope.spawn(move || {
                        (0..16)
                            .map(|_| {
                                let segment = SharedSegment::create_in(dir, 1).unwrap();
                                segment.name().to_string()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(names.len(), 8 * 16);
        assert!(names.iter().all(|n| n.starts_with(SEGMENT_PREFIX)));
    }
}
