//! Non-blocking busy flag
//!
//! A compare-and-set flag rather than a mutex: a worker that loses the race does
//! not wait, it counts the contention and picks another target.

use crate::error::FatalError;
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct BusyLock {
    busy: AtomicBool,
}

impl BusyLock {
    pub fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    /// Mark busy. Returns false immediately if somebody else holds it.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Clear the busy mark. `what` names the entity for the error message.
    pub fn unlock(&self, what: &str) -> Result<()> {
        if self.busy.swap(false, Ordering::Release) {
            Ok(())
        } else {
            Err(FatalError::NotBusy(what.to_string()).into())
        }
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::as_fatal;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_unlock() {
        let lock = BusyLock::new();
        assert!(lock.try_lock());
        assert!(!lock.try_lock());
        assert!(lock.is_busy());
        lock.unlock("f").unwrap();
        assert!(!lock.is_busy());
        assert!(lock.try_lock());
    }

    #[test]
    fn test_unlock_not_busy_is_fatal() {
        let lock = BusyLock::new();
        let err = lock.unlock("dir1_0.dir").unwrap_err();
        assert_eq!(as_fatal(&err), Some(&FatalError::NotBusy("dir1_0.dir".to_string())));
    }

    #[test]
    fn test_mutual_exclusion() {
        let lock = Arc::new(BusyLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let acquired = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                let acquired = Arc::clone(&acquired);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        if lock.try_lock() {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            acquired.fetch_add(1, Ordering::Relaxed);
                            inside.fetch_sub(1, Ordering::SeqCst);
                            lock.unlock("shared").unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(acquired.load(Ordering::Relaxed) > 0);
        assert!(!lock.is_busy());
    }
}
