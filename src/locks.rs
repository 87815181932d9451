//! Per-key async mutual exclusion.
//!
//! Concurrent batches may race on the same lookup-then-create sequence (two
//! rows naming the same new outlet, or sharing an email). Holding the key's
//! guard across the lookup and the write makes that sequence atomic per key.
//! Slots are dropped from the table once nobody holds or waits on them, so
//! the table only ever contains keys that are in use.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Fields drop in order: the mutex is released before the slot is
/// deregistered.
pub struct KeyGuard<'a> {
    _guard: OwnedMutexGuard<()>,
    _registration: Registration<'a>,
}

/// One user of a key's slot, taken before waiting on the mutex. The last
/// registration to drop removes the slot, whether its owner got the lock
/// or was cancelled while waiting.
struct Registration<'a> {
    locks: &'a KeyedLocks,
    key: String,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: impl Into<String>) -> KeyGuard<'_> {
        let key = key.into();
        let mutex = {
            let mut slots = self.slots();
            let slot = slots.entry(key.clone()).or_default();
            slot.users += 1;
            Arc::clone(&slot.mutex)
        };
        let registration = Registration { locks: self, key };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Keys currently held or awaited.
    pub fn active(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(AsyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for id in 0..4 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("acme").await;
                counter.lock().await.push(("enter", id));
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.lock().await.push(("exit", id));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let events = counter.lock().await;
        for pair in events.chunks(2) {
            assert_eq!(pair[0].0, "enter");
            assert_eq!(pair[1].0, "exit");
            assert_eq!(pair[0].1, pair[1].1);
        }
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_its_slot() {
        let locks = KeyedLocks::new();
        let held = locks.lock("acme").await;
        let waited = tokio::time::timeout(Duration::from_millis(10), locks.lock("acme")).await;
        assert!(waited.is_err());
        assert_eq!(locks.active(), 1);
        drop(held);
        assert_eq!(locks.active(), 0);

        let _again = locks.lock("acme").await;
        assert_eq!(locks.active(), 1);
    }
}
