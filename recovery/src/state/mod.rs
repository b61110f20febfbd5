//! State recovery store.
//!
//! Persists cleaned navigation snapshots under a fixed key, keeps a short
//! rolling in-memory history mirrored to a backup blob, and owns named
//! checkpoints. Restoration never dispatches a snapshot that fails
//! validation; corruption cascades backup -> default reset.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use wayfarer_core::NavigationSnapshot;
use wayfarer_core::PersistentStore;
use wayfarer_core::ResetDescriptor;
use wayfarer_core::SharedHandle;
use wayfarer_core::clean_navigation_state;
use wayfarer_core::validate_navigation_state;

/// Bumped when the persisted envelope shape changes; a mismatch on read
/// is treated the same as failed validation.
pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct StateStoreConfig {
    /// Base storage key; backup and checkpoint keys derive from it.
    pub key_prefix: String,
    /// Route for the single-entry default stack.
    pub home_route: String,
    /// Rolling in-memory history bound.
    pub history_limit: usize,
    /// How many history entries the persisted backup blob carries.
    pub backup_limit: usize,
    /// Checkpoint label bound; oldest-created labels are evicted.
    pub checkpoint_limit: usize,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "wayfarer_nav_state".to_string(),
            home_route: "Home".to_string(),
            history_limit: 10,
            backup_limit: 5,
            checkpoint_limit: 16,
        }
    }
}

/// Persisted envelope for the current state and history entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PersistedState {
    state: NavigationSnapshot,
    timestamp: DateTime<Utc>,
    version: u32,
}

/// Persisted backup blob: the most recent history entries, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupBlob {
    history: Vec<PersistedState>,
    timestamp: DateTime<Utc>,
}

/// Persisted named checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointBlob {
    label: String,
    state: NavigationSnapshot,
    timestamp: DateTime<Utc>,
    version: u32,
}

/// Read-only diagnostics from [`StateRecoveryStore::state_stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateStats {
    pub history_count: usize,
    pub is_recovering: bool,
    pub has_navigation_handle: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
}

/// Clears the in-progress flag when a recovery run finishes, even if it
/// unwinds early.
struct RecoveryGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct StateRecoveryStore {
    store: Arc<dyn PersistentStore>,
    handle: SharedHandle,
    config: StateStoreConfig,
    /// Rolling history, newest first. Held across the persist calls in
    /// `save_state` so interleaved saves cannot corrupt it.
    history: AsyncMutex<VecDeque<PersistedState>>,
    /// Checkpoint labels, newest first. `None` until first use, when the
    /// persisted index is read so labels written by earlier processes are
    /// governed by the same reset and eviction rules.
    checkpoints: AsyncMutex<Option<VecDeque<String>>>,
    recovering: AtomicBool,
    last_saved: Mutex<Option<DateTime<Utc>>>,
}

impl StateRecoveryStore {
    pub fn new(store: Arc<dyn PersistentStore>, handle: SharedHandle) -> Self {
        Self::with_config(store, handle, StateStoreConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn PersistentStore>,
        handle: SharedHandle,
        config: StateStoreConfig,
    ) -> Self {
        Self {
            store,
            handle,
            config,
            history: AsyncMutex::new(VecDeque::new()),
            checkpoints: AsyncMutex::new(None),
            recovering: AtomicBool::new(false),
            last_saved: Mutex::new(None),
        }
    }

    fn current_key(&self) -> String {
        self.config.key_prefix.clone()
    }

    fn backup_key(&self) -> String {
        format!("{}_backup", self.config.key_prefix)
    }

    fn checkpoint_key(&self, label: &str) -> String {
        format!("{}_checkpoint_{label}", self.config.key_prefix)
    }

    fn checkpoints_key(&self) -> String {
        format!("{}_checkpoints", self.config.key_prefix)
    }

    /// Lock the checkpoint label list, reading the persisted index on
    /// first use. Unreadable or missing index data starts empty.
    async fn checkpoint_labels(&self) -> tokio::sync::MutexGuard<'_, Option<VecDeque<String>>> {
        let mut guard = self.checkpoints.lock().await;
        if guard.is_none() {
            let labels = match self.store.get(&self.checkpoints_key()).await {
                Ok(Some(stored)) => match serde_json::from_str::<VecDeque<String>>(&stored) {
                    Ok(labels) => labels,
                    Err(err) => {
                        tracing::warn!(error = %err, "checkpoint index unreadable, starting empty");
                        VecDeque::new()
                    }
                },
                Ok(None) => VecDeque::new(),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read checkpoint index");
                    VecDeque::new()
                }
            };
            *guard = Some(labels);
        }
        guard
    }

    /// Write the label list back under the index key. Failures are logged
    /// only; the checkpoint blobs themselves are already persisted.
    async fn persist_checkpoint_labels(&self, labels: &VecDeque<String>) {
        let encoded = match serde_json::to_string(labels) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode checkpoint index");
                return;
            }
        };
        if let Err(err) = self.store.set(&self.checkpoints_key(), &encoded).await {
            tracing::warn!(error = %err, "failed to persist checkpoint index");
        }
    }

    /// Clean and persist a raw navigation state.
    ///
    /// Returns `false` without touching persisted state when the input is
    /// not minimally savable (no routes). Prepends to the rolling history
    /// and mirrors the newest entries into the backup blob.
    pub async fn save_state(&self, raw: &Value) -> bool {
        let Some(cleaned) = clean_navigation_state(raw) else {
            tracing::debug!("save skipped: state has no routes");
            return false;
        };
        if cleaned.routes.is_empty() {
            tracing::debug!("save skipped: state has no routes");
            return false;
        }

        let entry = PersistedState {
            state: cleaned,
            timestamp: Utc::now(),
            version: STATE_SCHEMA_VERSION,
        };
        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode navigation state");
                return false;
            }
        };

        // The history lock spans both writes so concurrent saves cannot
        // interleave a stale backup over a newer one.
        let mut history = self.history.lock().await;

        if let Err(err) = self.store.set(&self.current_key(), &encoded).await {
            tracing::warn!(error = %err, "failed to persist navigation state");
            return false;
        }

        history.push_front(entry);
        history.truncate(self.config.history_limit);

        let backup = BackupBlob {
            history: history
                .iter()
                .take(self.config.backup_limit)
                .cloned()
                .collect(),
            timestamp: Utc::now(),
        };
        match serde_json::to_string(&backup) {
            Ok(encoded) => {
                if let Err(err) = self.store.set(&self.backup_key(), &encoded).await {
                    tracing::warn!(error = %err, "failed to persist backup blob");
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode backup blob"),
        }
        drop(history);

        if let Ok(mut last) = self.last_saved.lock() {
            *last = Some(Utc::now());
        }
        true
    }

    /// Load the last saved state, falling back to the backup blob when the
    /// stored value is unreadable or fails validation. Never returns an
    /// invalid snapshot.
    pub async fn load_state(&self) -> Option<NavigationSnapshot> {
        let stored = match self.store.get(&self.current_key()).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read navigation state");
                return self.load_backup_state().await;
            }
        };

        match serde_json::from_str::<PersistedState>(&stored) {
            Ok(entry)
                if entry.version == STATE_SCHEMA_VERSION
                    && validate_navigation_state(&entry.state) =>
            {
                Some(entry.state)
            }
            Ok(_) => {
                tracing::warn!("stored navigation state failed validation, trying backup");
                self.load_backup_state().await
            }
            Err(err) => {
                tracing::warn!(error = %err, "stored navigation state unreadable, trying backup");
                self.load_backup_state().await
            }
        }
    }

    /// Most recent backup history entry that passes validation, if any.
    pub async fn load_backup_state(&self) -> Option<NavigationSnapshot> {
        let stored = match self.store.get(&self.backup_key()).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read backup blob");
                return None;
            }
        };

        let blob: BackupBlob = match serde_json::from_str(&stored) {
            Ok(blob) => blob,
            Err(err) => {
                tracing::warn!(error = %err, "backup blob unreadable");
                return None;
            }
        };

        blob.history
            .into_iter()
            .filter(|entry| entry.version == STATE_SCHEMA_VERSION)
            .map(|entry| entry.state)
            .find(validate_navigation_state)
    }

    /// Restore the navigation stack from persisted state.
    ///
    /// Single-flight: a second call while one is running returns `false`
    /// immediately without side effects. Falls back to the default stack
    /// when nothing restorable is found or the reset dispatch fails.
    pub async fn recover_navigation_state(&self) -> bool {
        if self
            .recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("recovery already in progress");
            return false;
        }
        let _guard = RecoveryGuard {
            flag: &self.recovering,
        };

        match self.load_state().await {
            Some(snapshot) => {
                let descriptor = ResetDescriptor::from_snapshot(&snapshot);
                if self
                    .handle
                    .try_call("recover_reset", |h| h.dispatch_reset(&descriptor))
                {
                    tracing::info!(
                        routes = snapshot.routes.len(),
                        index = snapshot.index,
                        "navigation state recovered"
                    );
                    true
                } else {
                    self.reset_to_default_state().await
                }
            }
            None => self.reset_to_default_state().await,
        }
    }

    /// Reset to the single-route default stack and drop all persisted and
    /// in-memory recovery state. Returns `false` if the reset dispatch
    /// fails; storage cleanup failures are logged only.
    pub async fn reset_to_default_state(&self) -> bool {
        let descriptor = ResetDescriptor::single(self.config.home_route.clone());
        if !self
            .handle
            .try_call("default_reset", |h| h.dispatch_reset(&descriptor))
        {
            return false;
        }

        let mut keys = vec![self.current_key(), self.backup_key(), self.checkpoints_key()];
        {
            let mut guard = self.checkpoint_labels().await;
            let checkpoints = guard.get_or_insert_with(VecDeque::new);
            keys.extend(checkpoints.iter().map(|label| self.checkpoint_key(label)));
            checkpoints.clear();
        }
        if let Err(err) = self.store.remove_many(&keys).await {
            tracing::warn!(error = %err, "failed to clear persisted navigation state");
        }

        self.history.lock().await.clear();
        if let Ok(mut last) = self.last_saved.lock() {
            *last = None;
        }
        tracing::info!(route = %self.config.home_route, "navigation reset to default state");
        true
    }

    /// Capture the live root state under a label, for explicit restore
    /// before/after a risky operation. Re-using a label overwrites it.
    pub async fn create_checkpoint(&self, label: &str) -> bool {
        let Some(handle) = self.handle.get() else {
            tracing::warn!(label, "checkpoint skipped: no navigation handle");
            return false;
        };
        let Some(raw) = handle.root_state() else {
            tracing::warn!(label, "checkpoint skipped: no root state");
            return false;
        };
        let Some(cleaned) = clean_navigation_state(&raw) else {
            tracing::warn!(label, "checkpoint skipped: root state not savable");
            return false;
        };
        if !validate_navigation_state(&cleaned) {
            tracing::warn!(label, "checkpoint skipped: root state failed validation");
            return false;
        }

        let blob = CheckpointBlob {
            label: label.to_string(),
            state: cleaned,
            timestamp: Utc::now(),
            version: STATE_SCHEMA_VERSION,
        };
        let encoded = match serde_json::to_string(&blob) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(label, error = %err, "failed to encode checkpoint");
                return false;
            }
        };
        if let Err(err) = self.store.set(&self.checkpoint_key(label), &encoded).await {
            tracing::warn!(label, error = %err, "failed to persist checkpoint");
            return false;
        }

        // Track label recency, evict beyond the configured bound, and keep
        // the persisted index in step so later processes see the same list.
        let evicted = {
            let mut guard = self.checkpoint_labels().await;
            let checkpoints = guard.get_or_insert_with(VecDeque::new);
            checkpoints.retain(|existing| existing != label);
            checkpoints.push_front(label.to_string());
            let mut evicted = Vec::new();
            while checkpoints.len() > self.config.checkpoint_limit {
                if let Some(old) = checkpoints.pop_back() {
                    evicted.push(old);
                }
            }
            self.persist_checkpoint_labels(checkpoints).await;
            evicted
        };
        for old in evicted {
            if let Err(err) = self.store.remove(&self.checkpoint_key(&old)).await {
                tracing::warn!(label = %old, error = %err, "failed to remove evicted checkpoint");
            }
            tracing::debug!(label = %old, "checkpoint evicted");
        }

        tracing::info!(label, "checkpoint created");
        true
    }

    /// Dispatch a reset to a previously created checkpoint.
    pub async fn restore_from_checkpoint(&self, label: &str) -> bool {
        let stored = match self.store.get(&self.checkpoint_key(label)).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::debug!(label, "no checkpoint under label");
                return false;
            }
            Err(err) => {
                tracing::warn!(label, error = %err, "failed to read checkpoint");
                return false;
            }
        };

        let blob: CheckpointBlob = match serde_json::from_str(&stored) {
            Ok(blob) => blob,
            Err(err) => {
                tracing::warn!(label, error = %err, "checkpoint unreadable");
                return false;
            }
        };
        if blob.version != STATE_SCHEMA_VERSION || !validate_navigation_state(&blob.state) {
            tracing::warn!(label, "checkpoint failed validation");
            return false;
        }

        let descriptor = ResetDescriptor::from_snapshot(&blob.state);
        let restored = self
            .handle
            .try_call("checkpoint_reset", |h| h.dispatch_reset(&descriptor));
        if restored {
            tracing::info!(label, "checkpoint restored");
        }
        restored
    }

    /// Called when a loaded or restored state blew up at dispatch time.
    /// Cascades backup recovery -> default reset; never propagates.
    pub async fn handle_state_corruption(
        &self,
        error: &dyn fmt::Display,
        current_state: Option<&NavigationSnapshot>,
    ) -> bool {
        tracing::error!(
            error = %error,
            routes = current_state.map(|state| state.routes.len()).unwrap_or(0),
            "navigation state corrupted"
        );

        if let Some(backup) = self.load_backup_state().await {
            let descriptor = ResetDescriptor::from_snapshot(&backup);
            if self
                .handle
                .try_call("corruption_reset", |h| h.dispatch_reset(&descriptor))
            {
                tracing::info!("recovered from backup after state corruption");
                return true;
            }
        }
        self.reset_to_default_state().await
    }

    /// Read-only diagnostic snapshot.
    pub async fn state_stats(&self) -> StateStats {
        StateStats {
            history_count: self.history.lock().await.len(),
            is_recovering: self.recovering.load(Ordering::SeqCst),
            has_navigation_handle: self.handle.is_attached(),
            last_saved_at: self.last_saved.lock().map(|last| *last).unwrap_or(None),
        }
    }
}

impl fmt::Debug for StateRecoveryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRecoveryStore")
            .field("key_prefix", &self.config.key_prefix)
            .field("is_recovering", &self.recovering.load(Ordering::SeqCst))
            .finish()
    }
}
