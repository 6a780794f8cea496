//! In-process per-path lock map: a mutex + condvar + refcount per target
//! path, paired with the on-disk `<path>.lock` protocol in
//! [`super::AtomicWriter::write_file`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, RwLock};

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    refcnt: usize,
}

#[derive(Debug, Default)]
struct LockEntry {
    state: Mutex<LockState>,
    condvar: Condvar,
}

/// Per-writer-instance map of `path -> LockEntry`, keyed so that concurrent
/// writers targeting the same path within one [`super::AtomicWriter`]
/// serialize on the same entry.
#[derive(Debug, Default)]
pub(super) struct LockMap {
    entries: RwLock<HashMap<PathBuf, Arc<LockEntry>>>,
}

impl LockMap {
    pub(super) fn new() -> Self {
        Self::default()
    }

    fn entry_for(&self, path: &Path) -> Arc<LockEntry> {
        if let Some(entry) = self.entries.read().unwrap_or_else(|e| e.into_inner()).get(path) {
            let mut state = entry.state.lock().unwrap_or_else(|e| e.into_inner());
            state.refcnt += 1;
            drop(state);
            return Arc::clone(entry);
        }
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let entry = guard.entry(path.to_path_buf()).or_default();
        let mut state = entry.state.lock().unwrap_or_else(|e| e.into_inner());
        state.refcnt += 1;
        drop(state);
        Arc::clone(entry)
    }

    /// Blocks until this writer instance's own in-process lock for `path`
    /// is free, then marks it held. Returns `false` if `deadline` elapses
    /// first (the caller must still release via [`Self::release`]).
    pub(super) fn acquire_until(&self, path: &Path, deadline: std::time::Instant) -> bool {
        let entry = self.entry_for(path);
        let mut state = entry.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.held {
            let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now()) else {
                return false;
            };
            let (guard, timeout) = entry
                .condvar
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
            if timeout.timed_out() && state.held {
                return false;
            }
        }
        state.held = true;
        true
    }

    /// Releases the in-process lock for `path`, waking any waiters and
    /// pruning the map entry once nobody references it.
    pub(super) fn release(&self, path: &Path) {
        let entry = {
            let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
            guard.get(path).cloned()
        };
        let Some(entry) = entry else { return };

        let should_remove = {
            let mut state = entry.state.lock().unwrap_or_else(|e| e.into_inner());
            state.held = false;
            state.refcnt = state.refcnt.saturating_sub(1);
            entry.condvar.notify_all();
            state.refcnt == 0 && !state.held
        };

        if should_remove {
            let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = guard.get(path) {
                let state = entry.state.lock().unwrap_or_else(|e| e.into_inner());
                if state.refcnt == 0 && !state.held {
                    drop(state);
                    guard.remove(path);
                }
            }
        }
    }

    /// Drops a reservation taken by [`Self::entry_for`] without ever having
    /// held the lock (used when acquisition times out before the entry was
    /// marked held).
    pub(super) fn abandon(&self, path: &Path) {
        self.release(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let map = LockMap::new();
        let path = PathBuf::from("x");
        assert!(map.acquire_until(&path, Instant::now() + Duration::from_secs(1)));
        map.release(&path);
        assert!(map.acquire_until(&path, Instant::now() + Duration::from_secs(1)));
        map.release(&path);
    }

    #[test]
    fn second_acquire_waits_for_release() {
        use std::thread;

        let map = Arc::new(LockMap::new());
        let path = PathBuf::from("y");
        assert!(map.acquire_until(&path, Instant::now() + Duration::from_secs(1)));

        let map2 = Arc::clone(&map);
        let path2 = path.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            map2.release(&path2);
        });

        let acquired = map.acquire_until(&path, Instant::now() + Duration::from_secs(2));
        assert!(acquired);
        handle.join().unwrap();
        map.release(&path);
    }

    #[test]
    fn acquire_times_out_when_held() {
        let map = LockMap::new();
        let path = PathBuf::from("z");
        assert!(map.acquire_until(&path, Instant::now() + Duration::from_secs(1)));
        let acquired = map.acquire_until(&path, Instant::now() + Duration::from_millis(50));
        assert!(!acquired);
        map.abandon(&path);
        map.release(&path);
    }
}
