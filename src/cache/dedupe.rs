//! In-flight request deduplication.
//!
//! Concurrent callers asking for the same key while a fetch is outstanding all
//! await one shared outcome. The fetch runs on its own task so dropping any
//! single caller never cancels it for the others.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use super::keys::KeyPattern;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::dedupe";

const METRIC_DEDUPE_JOINED: &str = "moodfeed_dedupe_joined_total";

/// Outcome delivered to every caller that joined one fetch.
#[derive(Debug, Error)]
pub enum DedupeError<E> {
    #[error("fetch failed: {0}")]
    Fetch(Arc<E>),
    #[error("in-flight fetch for `{key}` aborted: {reason}")]
    Aborted { key: String, reason: String },
}

impl<E> DedupeError<E> {
    /// The underlying fetch error, if the fetch itself failed.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            DedupeError::Fetch(err) => Some(err),
            DedupeError::Aborted { .. } => None,
        }
    }
}

impl<E> Clone for DedupeError<E> {
    fn clone(&self) -> Self {
        match self {
            DedupeError::Fetch(err) => DedupeError::Fetch(Arc::clone(err)),
            DedupeError::Aborted { key, reason } => DedupeError::Aborted {
                key: key.clone(),
                reason: reason.clone(),
            },
        }
    }
}

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, DedupeError<E>>>>;

struct PendingRequest<T, E> {
    id: u64,
    outcome: SharedOutcome<T, E>,
}

type PendingMap<T, E> = Arc<Mutex<HashMap<String, PendingRequest<T, E>>>>;

fn release<T, E>(pending: &PendingMap<T, E>, key: &str, id: u64) {
    let mut pending = mutex_lock(pending, SOURCE, "release");
    if pending.get(key).is_some_and(|entry| entry.id == id) {
        pending.remove(key);
    }
}

pub struct RequestDeduplicator<T, E> {
    name: &'static str,
    pending: PendingMap<T, E>,
    next_id: AtomicU64,
}

impl<T, E> RequestDeduplicator<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Runs `fetch` unless a fetch for `key` is already outstanding, in which
    /// case the caller joins it. Must be called from within a Tokio runtime.
    pub async fn dedupe<F, Fut>(&self, key: &str, fetch: F) -> Result<T, DedupeError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let outcome = {
            let mut pending = mutex_lock(&self.pending, SOURCE, "dedupe");
            match pending.get(key) {
                Some(existing) => {
                    counter!(METRIC_DEDUPE_JOINED, "dedupe" => self.name).increment(1);
                    debug!(dedupe = self.name, key, "Joined in-flight request");
                    existing.outcome.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.start(key, id, fetch());
                    pending.insert(
                        key.to_string(),
                        PendingRequest {
                            id,
                            outcome: outcome.clone(),
                        },
                    );
                    outcome
                }
            }
        };
        outcome.await
    }

    fn start<Fut>(&self, key: &str, id: u64, fetch: Fut) -> SharedOutcome<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let task_pending = Arc::clone(&self.pending);
        let task_key = key.to_string();
        let handle = tokio::spawn(async move {
            let result = fetch.await.map_err(|err| DedupeError::Fetch(Arc::new(err)));
            // Unregister before any caller can observe the outcome.
            release(&task_pending, &task_key, id);
            result
        });

        let pending = Arc::clone(&self.pending);
        let key = key.to_string();
        let name = self.name;
        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    release(&pending, &key, id);
                    warn!(dedupe = name, key = %key, error = %join_err, "In-flight fetch aborted");
                    Err(DedupeError::Aborted {
                        key,
                        reason: join_err.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Forgets the outstanding fetch for `key`; the next call starts a new one.
    /// Callers already waiting still receive the original outcome.
    pub fn invalidate(&self, key: &str) -> bool {
        mutex_lock(&self.pending, SOURCE, "invalidate")
            .remove(key)
            .is_some()
    }

    pub fn invalidate_matching(&self, pattern: &KeyPattern) -> usize {
        let mut pending = mutex_lock(&self.pending, SOURCE, "invalidate_matching");
        let before = pending.len();
        pending.retain(|key, _| !pattern.matches(key));
        before - pending.len()
    }

    pub fn clear(&self) {
        mutex_lock(&self.pending, SOURCE, "clear").clear();
    }

    pub fn pending_count(&self) -> usize {
        mutex_lock(&self.pending, SOURCE, "pending_count").len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::sync::oneshot;

    use super::*;

    #[derive(Debug, PartialEq)]
    struct FetchFailed(&'static str);

    impl std::fmt::Display for FetchFailed {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.0)
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let dedupe: RequestDeduplicator<u32, FetchFailed> = RequestDeduplicator::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let requests = (0..5).map(|_| {
            let calls = Arc::clone(&calls);
            dedupe.dedupe("posts:feed:1:1:", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(42)
            })
        });
        let results = join_all(requests).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|result| matches!(result, Ok(42))));
        assert_eq!(dedupe.pending_count(), 0);
    }

    #[tokio::test]
    async fn failure_is_shared_by_all_callers() {
        let dedupe: RequestDeduplicator<u32, FetchFailed> = RequestDeduplicator::new("test");

        let requests = (0..3).map(|_| {
            dedupe.dedupe("k", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err(FetchFailed("upstream down"))
            })
        });
        let results = join_all(requests).await;

        for result in results {
            let err = result.expect_err("fetch should fail");
            assert_eq!(err.fetch_error(), Some(&FetchFailed("upstream down")));
        }
        assert_eq!(dedupe.pending_count(), 0);
    }

    #[tokio::test]
    async fn settled_request_is_not_reused() {
        let dedupe: RequestDeduplicator<usize, FetchFailed> = RequestDeduplicator::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        for expected in 1..=2 {
            let calls = Arc::clone(&calls);
            let value = dedupe
                .dedupe("k", move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await
                .expect("fetch succeeds");
            assert_eq!(value, expected);
        }
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_fetch_for_others() {
        let dedupe: Arc<RequestDeduplicator<u32, FetchFailed>> =
            Arc::new(RequestDeduplicator::new("test"));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = {
            let dedupe = Arc::clone(&dedupe);
            tokio::spawn(async move {
                dedupe
                    .dedupe("k", move || async move {
                        let _ = release_rx.await;
                        Ok(7)
                    })
                    .await
            })
        };
        while dedupe.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let second = {
            let dedupe = Arc::clone(&dedupe);
            tokio::spawn(async move {
                dedupe
                    .dedupe("k", || async { Ok(99) })
                    .await
            })
        };
        tokio::task::yield_now().await;

        first.abort();
        let _ = first.await;
        let _ = release_tx.send(());

        let joined = second.await.expect("second caller task");
        assert_eq!(joined.expect("shared result"), 7);
    }

    #[tokio::test]
    async fn invalidate_starts_a_fresh_fetch() {
        let dedupe: Arc<RequestDeduplicator<u32, FetchFailed>> =
            Arc::new(RequestDeduplicator::new("test"));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let stale = {
            let dedupe = Arc::clone(&dedupe);
            tokio::spawn(async move {
                dedupe
                    .dedupe("k", move || async move {
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };
        while dedupe.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(dedupe.invalidate("k"));
        let fresh = dedupe.dedupe("k", || async { Ok(2) }).await;
        assert_eq!(fresh.expect("fresh fetch"), 2);

        let _ = release_tx.send(());
        assert_eq!(stale.await.expect("stale task").expect("stale result"), 1);
        assert_eq!(dedupe.pending_count(), 0);
    }

    #[tokio::test]
    async fn invalidate_matching_and_clear() {
        let dedupe: Arc<RequestDeduplicator<u32, FetchFailed>> =
            Arc::new(RequestDeduplicator::new("test"));
        let mut gates = Vec::new();
        for key in ["cache_best_posts_week", "cache_best_posts_month", "cache_my_recent_posts"] {
            let (tx, rx) = oneshot::channel::<()>();
            gates.push(tx);
            let dedupe = Arc::clone(&dedupe);
            tokio::spawn(async move {
                dedupe
                    .dedupe(key, move || async move {
                        let _ = rx.await;
                        Ok(0)
                    })
                    .await
            });
        }
        while dedupe.pending_count() < 3 {
            tokio::task::yield_now().await;
        }

        let removed = dedupe.invalidate_matching(&KeyPattern::parse("cache_best_posts_*"));
        assert_eq!(removed, 2);
        assert_eq!(dedupe.pending_count(), 1);

        dedupe.clear();
        assert_eq!(dedupe.pending_count(), 0);
        drop(gates);
    }

    #[tokio::test]
    async fn panicking_fetch_reports_aborted() {
        let dedupe: RequestDeduplicator<u32, FetchFailed> = RequestDeduplicator::new("test");
        let result = dedupe
            .dedupe("k", || async {
                let missing: Option<u32> = None;
                Ok(missing.expect("fetch exploded"))
            })
            .await;

        assert!(matches!(result, Err(DedupeError::Aborted { .. })));
        assert_eq!(dedupe.pending_count(), 0);
    }
}
