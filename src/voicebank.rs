//! Voicebank cache dedup lock (`spec.md` §5 "Concurrent first-use of the
//! same voicebank is deduplicated with a per-voicebank lock so at most one
//! download runs per key"; `SPEC_FULL.md` §9 supplemented features).
//!
//! The actual fetch/materialize step is delegated to [`ObjectStore`]; this
//! module only owns the concurrency discipline around it, since that's
//! part of this core's resource model, not the storage backend's.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct VoicebankCache {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VoicebankCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, voicebank_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(voicebank_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Run `fetch` while holding the per-voicebank lock, so two concurrent
    /// callers for the same id serialize rather than both downloading.
    pub async fn dedup<F, Fut, T>(&self, voicebank_id: &str, fetch: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(voicebank_id);
        let _guard = lock.lock().await;
        fetch().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn concurrent_fetches_for_same_key_run_one_at_a_time() {
        let cache = Arc::new(VoicebankCache::new());
        let calls = Arc::new(AtomicU32::new(0));
        let overlap = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let overlap = Arc::clone(&overlap);
            handles.push(tokio::spawn(async move {
                cache
                    .dedup("voicebank-1", || async {
                        let in_flight = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if in_flight > 1 {
                            overlap.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        calls.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }
}
