//! Retry queue engine.
//!
//! Accepts retryable navigation actions and executes them against the
//! shared navigation handle without blocking the caller. Each queued item
//! runs on its own tokio task: attempts within an item are strictly
//! sequential, items are independent of each other. Backoff sleeps race
//! against a queue-wide `CancellationToken` so `clear()` can cancel every
//! pending timer at once.

pub mod backoff;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde_json::Map;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use wayfarer_core::HandleError;
use wayfarer_core::NavigationHandle;
use wayfarer_core::SharedHandle;

use crate::error::RecoveryError;
use crate::error::Result;

/// Callable form of a custom retry action.
pub type CustomAction =
    Arc<dyn Fn(&dyn NavigationHandle) -> std::result::Result<(), HandleError> + Send + Sync>;

/// What a queued item does when its timer fires.
#[derive(Clone)]
pub enum RetryAction {
    Navigate {
        route: String,
        params: Option<Map<String, Value>>,
    },
    Custom(CustomAction),
}

impl RetryAction {
    pub fn navigate(route: impl Into<String>) -> Self {
        Self::Navigate {
            route: route.into(),
            params: None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Navigate { route, .. } => format!("navigate:{route}"),
            Self::Custom(_) => "custom".to_string(),
        }
    }

    fn execute(&self, handle: &dyn NavigationHandle) -> std::result::Result<(), HandleError> {
        match self {
            Self::Navigate { route, params } => handle.navigate(route, params.as_ref()),
            Self::Custom(action) => action(handle),
        }
    }
}

impl fmt::Debug for RetryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Per-item retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total attempts allowed, including the first.
    pub max_retries: u32,
    /// Base delay; also the width of the jitter window.
    pub delay: Duration,
    pub exponential_backoff: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(1000),
            exponential_backoff: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    Pending,
    Retrying,
    Succeeded,
    Failed,
}

/// Point-in-time view of a queued item. Callers never hold a live item.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryItemSnapshot {
    pub id: u64,
    pub description: String,
    pub attempts: u32,
    pub status: RetryStatus,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// Aggregate queue state returned by [`RetryQueue::status`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub items: Vec<RetryItemSnapshot>,
}

/// Terminal result of a queued item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32 },
    /// The queue was cleared before the item reached a terminal state.
    Cleared,
}

/// Handle returned by [`RetryQueue::enqueue`].
///
/// Carries the assigned id; `outcome()` resolves when the item reaches a
/// terminal state. Dropping the ticket detaches the waiter without
/// affecting the item.
#[derive(Debug)]
pub struct RetryTicket {
    id: u64,
    done: oneshot::Receiver<RetryOutcome>,
}

impl RetryTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn outcome(self) -> RetryOutcome {
        self.done.await.unwrap_or(RetryOutcome::Cleared)
    }
}

struct ActiveItem {
    description: String,
    attempts: u32,
    status: RetryStatus,
    created_at: DateTime<Utc>,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl ActiveItem {
    fn snapshot(&self, id: u64) -> RetryItemSnapshot {
        RetryItemSnapshot {
            id,
            description: self.description.clone(),
            attempts: self.attempts,
            status: self.status,
            created_at: self.created_at,
            last_attempt_at: self.last_attempt_at,
        }
    }
}

struct QueueInner {
    handle: SharedHandle,
    items: Mutex<HashMap<u64, ActiveItem>>,
    next_id: AtomicU64,
    /// Replaced wholesale on `clear()`; workers hold clones of the token
    /// that was current when they were spawned.
    cancel: Mutex<CancellationToken>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl QueueInner {
    fn is_active(&self, id: u64) -> bool {
        lock(&self.items).contains_key(&id)
    }

    fn mark_attempt(&self, id: u64, attempts: u32) {
        if let Some(item) = lock(&self.items).get_mut(&id) {
            item.attempts = attempts;
            item.status = RetryStatus::Retrying;
            item.last_attempt_at = Some(Utc::now());
        }
    }

    /// Terminal state reached; drop the item from active tracking. Its id
    /// is never reused.
    fn finish(&self, id: u64) {
        lock(&self.items).remove(&id);
    }
}

/// The retry queue engine.
///
/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct RetryQueue {
    inner: Arc<QueueInner>,
}

impl RetryQueue {
    pub fn new(handle: SharedHandle) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                handle,
                items: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Queue an action for asynchronous execution with default options.
    pub fn enqueue(&self, action: RetryAction) -> Result<RetryTicket> {
        self.enqueue_with(action, RetryOptions::default())
    }

    /// Queue an action for asynchronous execution.
    ///
    /// Returns immediately; the first attempt is scheduled with zero
    /// delay on the queue's scheduler. Fails fast on actions that could
    /// never execute (an empty route name).
    pub fn enqueue_with(&self, action: RetryAction, options: RetryOptions) -> Result<RetryTicket> {
        if let RetryAction::Navigate { route, .. } = &action
            && route.is_empty()
        {
            return Err(RecoveryError::InvalidAction(
                "navigate action requires a route name".to_string(),
            ));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let description = action.describe();
        lock(&self.inner.items).insert(
            id,
            ActiveItem {
                description: description.clone(),
                attempts: 0,
                status: RetryStatus::Pending,
                created_at: Utc::now(),
                last_attempt_at: None,
            },
        );

        let cancel = lock(&self.inner.cancel).clone();
        let (done_tx, done_rx) = oneshot::channel();
        tracing::debug!(item = id, action = %description, "retry item queued");
        tokio::spawn(run_item(
            Arc::clone(&self.inner),
            id,
            action,
            options,
            cancel,
            done_tx,
        ));

        Ok(RetryTicket { id, done: done_rx })
    }

    /// Snapshot of one queued item, if it is still active.
    pub fn status_of(&self, id: u64) -> Option<RetryItemSnapshot> {
        lock(&self.inner.items).get(&id).map(|item| item.snapshot(id))
    }

    /// Aggregate queue state. Pure read.
    pub fn status(&self) -> QueueStatus {
        let items = lock(&self.inner.items);
        let mut summaries: Vec<RetryItemSnapshot> = items
            .iter()
            .map(|(id, item)| item.snapshot(*id))
            .collect();
        summaries.sort_by_key(|item| item.id);
        QueueStatus {
            queue_length: summaries.len(),
            items: summaries,
        }
    }

    /// Cancel every pending and retrying item.
    ///
    /// Cancels all outstanding backoff timers; a timer that already fired
    /// re-checks the active map and no-ops. Returns the number of items
    /// cancelled.
    pub fn clear(&self) -> usize {
        let stale = {
            let mut guard = lock(&self.inner.cancel);
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        stale.cancel();

        let cleared = {
            let mut items = lock(&self.inner.items);
            let count = items.len();
            items.clear();
            count
        };
        tracing::info!(cleared, "retry queue cleared");
        cleared
    }
}

impl fmt::Debug for RetryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryQueue")
            .field("queue_length", &lock(&self.inner.items).len())
            .finish()
    }
}

/// Drive one item to a terminal state. Attempts are strictly sequential;
/// the backoff sleep races the queue's cancellation token.
async fn run_item(
    inner: Arc<QueueInner>,
    id: u64,
    action: RetryAction,
    options: RetryOptions,
    cancel: CancellationToken,
    done: oneshot::Sender<RetryOutcome>,
) {
    let max_attempts = options.max_retries.max(1);
    let mut attempts = 0u32;

    loop {
        // Liveness check: the queue may have been cleared while this task
        // was waiting to run.
        if cancel.is_cancelled() || !inner.is_active(id) {
            let _ = done.send(RetryOutcome::Cleared);
            return;
        }

        attempts += 1;
        inner.mark_attempt(id, attempts);

        match inner.handle.call(|handle| action.execute(handle)) {
            Ok(()) => {
                inner.finish(id);
                tracing::debug!(item = id, attempts, "retry item succeeded");
                let _ = done.send(RetryOutcome::Succeeded { attempts });
                return;
            }
            Err(err) if attempts >= max_attempts => {
                inner.finish(id);
                tracing::warn!(
                    item = id,
                    attempts,
                    error = %err,
                    "retry attempts exhausted"
                );
                let _ = done.send(RetryOutcome::Failed { attempts });
                return;
            }
            Err(err) => {
                let delay = backoff::backoff_delay(&options, attempts);
                tracing::debug!(
                    item = id,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retry attempt failed, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = done.send(RetryOutcome::Cleared);
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use wayfarer_core::ResetDescriptor;
    use wayfarer_core::RouteInfo;

    /// Handle that fails a scripted number of times before succeeding.
    struct FlakyHandle {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyHandle {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl NavigationHandle for FlakyHandle {
        fn navigate(
            &self,
            _route: &str,
            _params: Option<&Map<String, Value>>,
        ) -> std::result::Result<(), HandleError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(HandleError::Dispatch("screen not mounted".into()))
            } else {
                Ok(())
            }
        }

        fn dispatch_reset(
            &self,
            _descriptor: &ResetDescriptor,
        ) -> std::result::Result<(), HandleError> {
            Ok(())
        }

        fn can_go_back(&self) -> bool {
            false
        }

        fn go_back(&self) -> std::result::Result<(), HandleError> {
            Ok(())
        }

        fn current_route(&self) -> Option<RouteInfo> {
            None
        }

        fn root_state(&self) -> Option<Value> {
            None
        }
    }

    fn fast_options(max_retries: u32) -> RetryOptions {
        RetryOptions {
            max_retries,
            delay: Duration::from_millis(10),
            exponential_backoff: true,
        }
    }

    fn attach(handle: FlakyHandle) -> (SharedHandle, Arc<FlakyHandle>) {
        let shared = SharedHandle::new();
        let handle = Arc::new(handle);
        shared.attach(handle.clone());
        (shared, handle)
    }

    #[tokio::test]
    async fn ids_are_monotonic_and_queue_length_tracks_enqueues() {
        // No handle attached and a long backoff keeps items in the queue.
        let queue = RetryQueue::new(SharedHandle::new());
        let options = RetryOptions {
            delay: Duration::from_secs(60),
            ..Default::default()
        };

        let a = queue
            .enqueue_with(RetryAction::navigate("Map"), options.clone())
            .unwrap();
        let b = queue
            .enqueue_with(RetryAction::navigate("Journeys"), options)
            .unwrap();

        assert!(b.id() > a.id());
        assert_eq!(2, queue.status().queue_length);
        queue.clear();
    }

    #[tokio::test]
    async fn empty_route_fails_fast() {
        let queue = RetryQueue::new(SharedHandle::new());
        let result = queue.enqueue(RetryAction::navigate(""));
        assert!(matches!(result, Err(RecoveryError::InvalidAction(_))));
        assert_eq!(0, queue.status().queue_length);
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_with_single_invocation() {
        let (shared, handle) = attach(FlakyHandle::new(0));
        let queue = RetryQueue::new(shared);

        let ticket = queue.enqueue(RetryAction::navigate("Map")).unwrap();
        assert_eq!(RetryOutcome::Succeeded { attempts: 1 }, ticket.outcome().await);
        assert_eq!(1, handle.calls());
        assert_eq!(0, queue.status().queue_length);
    }

    #[tokio::test]
    async fn retries_until_success_with_exact_invocation_count() {
        let (shared, handle) = attach(FlakyHandle::new(2));
        let queue = RetryQueue::new(shared);

        let ticket = queue
            .enqueue_with(RetryAction::navigate("Map"), fast_options(5))
            .unwrap();
        assert_eq!(RetryOutcome::Succeeded { attempts: 3 }, ticket.outcome().await);
        assert_eq!(3, handle.calls());
    }

    #[tokio::test]
    async fn exhaustion_reports_failed_with_exact_invocation_count() {
        let (shared, handle) = attach(FlakyHandle::new(usize::MAX));
        let queue = RetryQueue::new(shared);

        let ticket = queue
            .enqueue_with(RetryAction::navigate("Map"), fast_options(2))
            .unwrap();
        assert_eq!(RetryOutcome::Failed { attempts: 2 }, ticket.outcome().await);
        assert_eq!(2, handle.calls());
        assert_eq!(0, queue.status().queue_length);
    }

    #[tokio::test]
    async fn missing_handle_is_a_retryable_failure() {
        let queue = RetryQueue::new(SharedHandle::new());

        let ticket = queue
            .enqueue_with(RetryAction::navigate("Map"), fast_options(2))
            .unwrap();
        assert_eq!(RetryOutcome::Failed { attempts: 2 }, ticket.outcome().await);
    }

    #[tokio::test]
    async fn custom_actions_run_against_the_handle() {
        let (shared, _handle) = attach(FlakyHandle::new(0));
        let queue = RetryQueue::new(shared);

        let ticket = queue
            .enqueue(RetryAction::Custom(Arc::new(|handle| {
                handle.navigate("Profile", None)
            })))
            .unwrap();
        assert_eq!(RetryOutcome::Succeeded { attempts: 1 }, ticket.outcome().await);
    }

    #[tokio::test]
    async fn clear_cancels_backoff_and_reports_exact_count() {
        let queue = RetryQueue::new(SharedHandle::new());
        let options = RetryOptions {
            delay: Duration::from_secs(60),
            ..Default::default()
        };

        let a = queue
            .enqueue_with(RetryAction::navigate("Map"), options.clone())
            .unwrap();
        let b = queue
            .enqueue_with(RetryAction::navigate("Journeys"), options)
            .unwrap();

        // Let both items fail their first attempt and enter backoff.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(2, queue.clear());
        assert_eq!(0, queue.status().queue_length);
        assert_eq!(RetryOutcome::Cleared, a.outcome().await);
        assert_eq!(RetryOutcome::Cleared, b.outcome().await);
        assert_eq!(0, queue.clear());
    }

    #[tokio::test]
    async fn status_of_reports_attempt_progress() {
        let queue = RetryQueue::new(SharedHandle::new());
        let ticket = queue
            .enqueue_with(
                RetryAction::navigate("Map"),
                RetryOptions {
                    delay: Duration::from_secs(60),
                    ..Default::default()
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = queue.status_of(ticket.id()).unwrap();
        assert_eq!(RetryStatus::Retrying, snapshot.status);
        assert_eq!(1, snapshot.attempts);
        assert_eq!("navigate:Map", snapshot.description);
        assert!(snapshot.last_attempt_at.is_some());
        queue.clear();
    }
}
