//! Persistent, file-locked work queue.
//!
//! The whole pool lives in one JSON document (`sweeps.json`) next to a lock
//! file (`.lock`). Every operation takes an exclusive advisory lock on the
//! lock file, reads the document, applies its change and atomically
//! replaces the document (temp file + rename) before releasing the lock.
//!
//! The lock is taken on a fresh file handle per operation, so handles held
//! by different threads, processes or hosts sharing the directory exclude
//! one another the same way.

use fs2::FileExt;
use reconf_env::{ParameterSet, QueueStats, SweepError, WorkQueue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

const STATE_FILE: &str = "sweeps.json";
const LOCK_FILE: &str = ".lock";

/// On-disk queue document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    sweeps: BTreeSet<ParameterSet>,
    in_progress: BTreeSet<ParameterSet>,
    done: BTreeSet<ParameterSet>,
    skipped: BTreeSet<ParameterSet>,
}

impl QueueState {
    fn is_available(&self, params: &ParameterSet) -> bool {
        !self.in_progress.contains(params)
            && !self.done.contains(params)
            && !self.skipped.contains(params)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            total: self.sweeps.len(),
            remaining: self.sweeps.iter().filter(|p| self.is_available(p)).count(),
            in_progress: self.in_progress.len(),
            done: self.done.len(),
            skipped: self.skipped.len(),
        }
    }

    fn ensure_known(&self, params: &ParameterSet) -> Result<(), SweepError> {
        if self.sweeps.contains(params) {
            Ok(())
        } else {
            Err(SweepError::queue(format!("{} is not part of this sweep", params)))
        }
    }
}

/// Work queue persisted in a directory.
///
/// Cloning is cheap: clones only share the directory path.
#[derive(Debug, Clone)]
pub struct FileQueue {
    dir: PathBuf,
}

impl FileQueue {
    /// Opens (or creates) the queue in `dir` and merges `sweeps` into it.
    ///
    /// Reopening an existing directory resumes it: items already done,
    /// skipped or in progress stay that way.
    pub fn open(dir: impl Into<PathBuf>, sweeps: &[ParameterSet]) -> Result<Self, SweepError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| SweepError::io(&dir, e))?;
        let queue = Self { dir };

        let stats = queue.with_state(|state| {
            state.sweeps.extend(sweeps.iter().copied());
            Ok(state.stats())
        })?;
        info!(
            "Work queue at {}: {} total, {} remaining, {} done, {} skipped, {} in progress",
            queue.dir.display(),
            stats.total,
            stats.remaining,
            stats.done,
            stats.skipped,
            stats.in_progress
        );
        if stats.in_progress > 0 {
            warn!(
                "{} items are still marked in progress from an earlier run",
                stats.in_progress
            );
        }
        Ok(queue)
    }

    /// Directory backing this queue.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns every in-progress item to the pool. Returns how many.
    ///
    /// Only safe when no consumer is running against this directory.
    pub fn reset_in_progress(&self) -> Result<usize, SweepError> {
        let count = self.with_state(|state| {
            let count = state.in_progress.len();
            state.in_progress.clear();
            Ok(count)
        })?;
        info!("Returned {} in-progress items to the pool", count);
        Ok(count)
    }

    /// Items marked done, in key order.
    pub fn done_items(&self) -> Result<Vec<ParameterSet>, SweepError> {
        self.with_state(|state| Ok(state.done.iter().copied().collect()))
    }

    /// Items marked skipped, in key order.
    pub fn skipped_items(&self) -> Result<Vec<ParameterSet>, SweepError> {
        self.with_state(|state| Ok(state.skipped.iter().copied().collect()))
    }

    /// Runs `f` on the state under the exclusive lock and persists the result.
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut QueueState) -> Result<T, SweepError>,
    ) -> Result<T, SweepError> {
        let lock_path = self.dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| SweepError::io(&lock_path, e))?;
        FileExt::lock_exclusive(&lock).map_err(|e| SweepError::io(&lock_path, e))?;

        let result = self.load().and_then(|mut state| {
            let out = f(&mut state)?;
            self.store(&state)?;
            Ok(out)
        });

        if let Err(e) = FileExt::unlock(&lock) {
            warn!("Failed to release {}: {}", lock_path.display(), e);
        }
        result
    }

    fn load(&self) -> Result<QueueState, SweepError> {
        let path = self.dir.join(STATE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| SweepError::queue(format!("corrupt {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueState::default()),
            Err(e) => Err(SweepError::io(path, e)),
        }
    }

    fn store(&self, state: &QueueState) -> Result<(), SweepError> {
        let path = self.dir.join(STATE_FILE);
        let tmp = self.dir.join(format!("{}.{}.tmp", STATE_FILE, Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(state).map_err(SweepError::serialization)?;

        let mut file = File::create(&tmp).map_err(|e| SweepError::io(&tmp, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| SweepError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| SweepError::io(&path, e))
    }
}

impl WorkQueue for FileQueue {
    fn get_next(&self) -> Result<Option<ParameterSet>, SweepError> {
        let next = self.with_state(|state| {
            let next = state
                .sweeps
                .iter()
                .find(|p| state.is_available(p))
                .copied();
            if let Some(params) = next {
                state.in_progress.insert(params);
            }
            Ok(next)
        })?;
        if let Some(params) = &next {
            debug!("claimed {}", params);
        }
        Ok(next)
    }

    fn done(&self, params: &ParameterSet) -> Result<(), SweepError> {
        self.with_state(|state| {
            state.ensure_known(params)?;
            if state.skipped.contains(params) {
                return Err(SweepError::queue(format!("{} was already skipped", params)));
            }
            state.in_progress.remove(params);
            state.done.insert(*params);
            Ok(())
        })
    }

    fn skip(&self, params: &ParameterSet) -> Result<(), SweepError> {
        self.with_state(|state| {
            state.ensure_known(params)?;
            if state.done.contains(params) {
                return Err(SweepError::queue(format!("{} was already done", params)));
            }
            state.in_progress.remove(params);
            state.skipped.insert(*params);
            Ok(())
        })
    }

    fn stats(&self) -> Result<QueueStats, SweepError> {
        self.with_state(|state| Ok(state.stats()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::Dimensions;
    use proptest::prelude::*;
    use reconf_env::TopologyId;

    fn sweeps(runs: u32) -> Vec<ParameterSet> {
        Dimensions {
            topologies: vec![TopologyId::StarFav, TopologyId::GridNonFav],
            node_counts: vec![9, 16],
            run_ids: (0..runs).collect(),
        }
        .cross_product()
    }

    /// One consumer draining until empty; odd run ids are skipped.
    fn consume(queue: &FileQueue) -> Vec<ParameterSet> {
        let mut claimed = Vec::new();
        while let Some(params) = queue.get_next().unwrap() {
            if params.run_id % 2 == 0 {
                queue.done(&params).unwrap();
            } else {
                queue.skip(&params).unwrap();
            }
            claimed.push(params);
        }
        claimed
    }

    /// Drains with `workers` threads.
    fn drain(queue: &FileQueue, workers: usize) -> Vec<ParameterSet> {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || consume(&queue))
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    }

    #[test]
    fn test_items_handed_out_in_order_once() {
        let dir = tempfile::tempdir().unwrap();
        let items = sweeps(2);
        let queue = FileQueue::open(dir.path(), &items).unwrap();

        let first = queue.get_next().unwrap().unwrap();
        let second = queue.get_next().unwrap().unwrap();
        assert_eq!(first, items[0]);
        assert_eq!(second, items[1]);

        let stats = queue.stats().unwrap();
        assert_eq!(stats.in_progress, 2);
        assert_eq!(stats.remaining, items.len() - 2);
    }

    #[test]
    fn test_reopen_resumes_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let items = sweeps(3);
        {
            let queue = FileQueue::open(dir.path(), &items).unwrap();
            let a = queue.get_next().unwrap().unwrap();
            queue.done(&a).unwrap();
            let b = queue.get_next().unwrap().unwrap();
            queue.skip(&b).unwrap();
        }

        let queue = FileQueue::open(dir.path(), &items).unwrap();
        let stats = queue.stats().unwrap();
        assert_eq!(stats.total, items.len());
        assert_eq!(stats.done, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.remaining, items.len() - 2);
        assert_eq!(queue.get_next().unwrap(), Some(items[2]));
    }

    #[test]
    fn test_abandoned_items_stay_claimed_until_reset() {
        let dir = tempfile::tempdir().unwrap();
        let items = sweeps(1);
        let queue = FileQueue::open(dir.path(), &items).unwrap();
        let abandoned = queue.get_next().unwrap().unwrap();

        let reopened = FileQueue::open(dir.path(), &items).unwrap();
        assert_eq!(reopened.stats().unwrap().in_progress, 1);
        assert_ne!(reopened.get_next().unwrap(), Some(abandoned));

        assert_eq!(reopened.reset_in_progress().unwrap(), 2);
        assert_eq!(reopened.get_next().unwrap(), Some(abandoned));
    }

    #[test]
    fn test_done_and_skip_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let items = sweeps(1);
        let queue = FileQueue::open(dir.path(), &items).unwrap();
        let params = queue.get_next().unwrap().unwrap();
        queue.done(&params).unwrap();
        assert!(queue.skip(&params).is_err());

        let stranger = ParameterSet::new(TopologyId::CliqueFav, 4, 99);
        assert!(matches!(queue.done(&stranger), Err(SweepError::Queue(_))));
    }

    #[test]
    fn test_concurrent_drain_hands_each_item_out_once() {
        let dir = tempfile::tempdir().unwrap();
        let items = sweeps(5);
        let queue = FileQueue::open(dir.path(), &items).unwrap();

        let mut claimed = drain(&queue, 4);
        claimed.sort();
        assert_eq!(claimed, items);

        let stats = queue.stats().unwrap();
        assert!(stats.is_drained());
        assert_eq!(stats.done + stats.skipped, items.len());
        // No temp files left behind
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().map_or(false, |x| x == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    const CHILD_QUEUE_ENV: &str = "RECONF_SWEEP_CHILD_QUEUE";
    const CHILD_CLAIMS_ENV: &str = "RECONF_SWEEP_CHILD_CLAIMS";

    /// Consumer body run inside a child process spawned by
    /// `test_child_processes_share_queue`.
    #[test]
    #[ignore = "runs as a child process of test_child_processes_share_queue"]
    fn drain_queue_in_child_process() {
        let (Ok(dir), Ok(claims)) = (std::env::var(CHILD_QUEUE_ENV), std::env::var(CHILD_CLAIMS_ENV))
        else {
            return;
        };
        let queue = FileQueue::open(dir, &[]).unwrap();
        let claimed = consume(&queue);
        std::fs::write(claims, serde_json::to_string(&claimed).unwrap()).unwrap();
    }

    #[test]
    fn test_child_processes_share_queue() {
        let dir = tempfile::tempdir().unwrap();
        let claims_dir = tempfile::tempdir().unwrap();
        let items = sweeps(12);
        let queue = FileQueue::open(dir.path(), &items).unwrap();

        let exe = std::env::current_exe().unwrap();
        let children: Vec<_> = (0..2)
            .map(|i| {
                std::process::Command::new(&exe)
                    .args(["--exact", "queue::tests::drain_queue_in_child_process"])
                    .args(["--ignored", "--test-threads=1", "--quiet"])
                    .env(CHILD_QUEUE_ENV, dir.path())
                    .env(CHILD_CLAIMS_ENV, claims_dir.path().join(format!("child-{}.json", i)))
                    .stdout(std::process::Stdio::null())
                    .spawn()
                    .unwrap()
            })
            .collect();

        let mut claimed = consume(&queue);
        for (i, mut child) in children.into_iter().enumerate() {
            assert!(child.wait().unwrap().success());
            let raw = std::fs::read_to_string(claims_dir.path().join(format!("child-{}.json", i))).unwrap();
            let child_claims: Vec<ParameterSet> = serde_json::from_str(&raw).unwrap();
            claimed.extend(child_claims);
        }

        claimed.sort();
        assert_eq!(claimed, items);
        let stats = queue.stats().unwrap();
        assert!(stats.is_drained());
        assert_eq!(stats.done + stats.skipped, items.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(6))]

        #[test]
        fn prop_outcomes_independent_of_worker_count(workers in 1usize..=4, runs in 1u32..4) {
            let items = sweeps(runs);

            let single_dir = tempfile::tempdir().unwrap();
            let single = FileQueue::open(single_dir.path(), &items).unwrap();
            drain(&single, 1);

            let multi_dir = tempfile::tempdir().unwrap();
            let multi = FileQueue::open(multi_dir.path(), &items).unwrap();
            drain(&multi, workers);

            let done_single: BTreeSet<_> = single.done_items().unwrap().into_iter().collect();
            let done_multi: BTreeSet<_> = multi.done_items().unwrap().into_iter().collect();
            prop_assert_eq!(done_single, done_multi);
            prop_assert_eq!(single.skipped_items().unwrap(), multi.skipped_items().unwrap());
            prop_assert!(multi.stats().unwrap().is_drained());
        }
    }
}
