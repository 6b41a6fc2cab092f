//! Keyed mutual exclusion
//!
//! Serializes temporal-chain rewrites per (user, session) without a global
//! lock; unrelated sessions never contend.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of independently lockable critical sections, one per key
#[derive(Default)]
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedMutex {
    /// Create an empty keyed mutex
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting if another holder has it
    ///
    /// The guard releases on drop. Locks for distinct keys are
    /// independent.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        entry.lock_owned().await
    }

    /// Build the conventional chain key for a user/session pair
    pub fn session_key(user_id: &str, session_id: &str) -> String {
        format!("{user_id}\u{1f}{session_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_same_key_serializes() {
        let mutex = Arc::new(KeyedMutex::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let mutex = Arc::clone(&mutex);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = mutex.lock("u1:s1").await;
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                // No other holder may have advanced the counter meanwhile
                assert_eq!(counter.load(Ordering::SeqCst), seen + 1);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let mutex = KeyedMutex::new();
        let _a = mutex.lock("u1:s1").await;
        // Must not deadlock while the first guard is held
        let _b = mutex.lock("u2:s2").await;
    }

    #[test]
    fn test_session_key_is_unambiguous() {
        // Separator keeps ("ab", "c") distinct from ("a", "bc")
        assert_ne!(
            KeyedMutex::session_key("ab", "c"),
            KeyedMutex::session_key("a", "bc")
        );
    }
}
