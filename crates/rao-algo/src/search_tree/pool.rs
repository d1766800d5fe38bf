//! Bounded pool of exclusive network snapshots.
//!
//! Each in-flight leaf holds one snapshot handle. Handles are checked out
//! reset to the root snapshot and go back to the pool when the
//! [`PooledSnapshot`] guard is dropped. Checking out from an exhausted pool
//! blocks until another leaf releases its handle.

use rao_core::{NetworkSnapshot, RaoError, RaoResult};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex};

#[derive(Debug)]
pub struct SnapshotPool {
    template: NetworkSnapshot,
    available: Mutex<Vec<NetworkSnapshot>>,
    released: Condvar,
    capacity: usize,
}

impl SnapshotPool {
    /// Pool of `capacity` copies of `template` (at least one).
    pub fn new(template: NetworkSnapshot, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let available = (0..capacity).map(|_| template.clone()).collect();
        Arc::new(Self {
            template,
            available: Mutex::new(available),
            released: Condvar::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handles currently not checked out.
    pub fn available(&self) -> usize {
        self.available.lock().map(|handles| handles.len()).unwrap_or(0)
    }

    pub fn template(&self) -> &NetworkSnapshot {
        &self.template
    }

    /// Check a handle out, reset to the root snapshot. Blocks while the pool is empty.
    pub fn acquire(self: &Arc<Self>) -> RaoResult<PooledSnapshot> {
        let poisoned = |_| RaoError::Other("snapshot pool lock poisoned".into());
        let mut handles = self.available.lock().map_err(poisoned)?;
        loop {
            if let Some(mut snapshot) = handles.pop() {
                snapshot.reset_from(&self.template);
                return Ok(PooledSnapshot {
                    snapshot,
                    pool: Arc::clone(self),
                });
            }
            handles = self.released.wait(handles).map_err(poisoned)?;
        }
    }

    fn release(&self, snapshot: NetworkSnapshot) {
        if let Ok(mut handles) = self.available.lock() {
            handles.push(snapshot);
            self.released.notify_one();
        }
    }
}

/// A snapshot checked out of a [`SnapshotPool`].
#[derive(Debug)]
pub struct PooledSnapshot {
    snapshot: NetworkSnapshot,
    pool: Arc<SnapshotPool>,
}

impl Deref for PooledSnapshot {
    type Target = NetworkSnapshot;

    fn deref(&self) -> &NetworkSnapshot {
        &self.snapshot
    }
}

impl DerefMut for PooledSnapshot {
    fn deref_mut(&mut self) -> &mut NetworkSnapshot {
        &mut self.snapshot
    }
}

impl Drop for PooledSnapshot {
    fn drop(&mut self) {
        let snapshot = std::mem::take(&mut self.snapshot);
        self.pool.release(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn template() -> NetworkSnapshot {
        NetworkSnapshot::new("root").with_element("line-1", true)
    }

    #[test]
    fn test_handles_are_reset_on_acquire() {
        let pool = SnapshotPool::new(template(), 1);
        {
            let mut handle = pool.acquire().unwrap();
            handle.set_connected("line-1", false);
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
        let handle = pool.acquire().unwrap();
        assert_eq!(handle.is_connected("line-1"), Some(true));
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = SnapshotPool::new(template(), 1);
        let first = pool.acquire().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire().map(|h| h.id().to_string()))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(first);
        assert_eq!(waiter.join().unwrap().unwrap(), "root");
    }

    #[test]
    fn test_capacity_is_at_least_one() {
        let pool = SnapshotPool::new(template(), 0);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.available(), 1);
    }
}
