//! Per-user affinity profile store.
//!
//! Memory is authoritative once the persisted blob has been merged in; every
//! mutation bumps a revision and schedules a background write of the latest
//! snapshot. A generation counter fences off work that outlives its consumer:
//! after `reset` or `detach`, in-flight loads and writes from the old
//! generation are dropped on arrival.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

use dashmap::DashMap;
use time::{Date, Duration};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::lock::{rw_read, rw_write};
use crate::cache::{DurableStorage, StorageError};
use crate::domain::{AffinityProfile, Category, Signal, UserId};

use super::sources::{CategoryStatsSource, SavedItemsSource};

const SOURCE: &str = "application::affinity";

const STORAGE_KEY_PREFIX: &str = "@affinity_profile:";
const DEFAULT_MIN_VIEW_SECONDS: u64 = 2;
const DEFAULT_STATS_WINDOW_DAYS: u32 = 7;
const DEFAULT_SAVED_ITEMS_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct AffinityConfig {
    /// Views shorter than this are noise and are not recorded.
    pub min_view_duration: StdDuration,
    /// Days of server statistics folded in by `refresh`.
    pub stats_window_days: u32,
    /// Saved items folded in by `refresh`.
    pub saved_items_limit: usize,
}

impl Default for AffinityConfig {
    fn default() -> Self {
        Self {
            min_view_duration: StdDuration::from_secs(DEFAULT_MIN_VIEW_SECONDS),
            stats_window_days: DEFAULT_STATS_WINDOW_DAYS,
            saved_items_limit: DEFAULT_SAVED_ITEMS_LIMIT,
        }
    }
}

impl From<&crate::config::AffinitySettings> for AffinityConfig {
    fn from(settings: &crate::config::AffinitySettings) -> Self {
        Self {
            // Settings validation rejects values that do not fit a duration.
            min_view_duration: StdDuration::try_from_secs_f64(settings.min_view_seconds)
                .unwrap_or(StdDuration::MAX),
            stats_window_days: settings.stats_window_days,
            saved_items_limit: settings.saved_items_limit,
        }
    }
}

pub fn storage_key(user: UserId) -> String {
    format!("{STORAGE_KEY_PREFIX}{user}")
}

#[derive(Debug, Default)]
struct ProfileState {
    profile: AffinityProfile,
    /// Bumped on every change to `profile`.
    revision: u64,
    /// True once the persisted blob has been merged in.
    hydrated: bool,
}

/// What `refresh` did with the server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Server counts were merged; carries the resulting profile.
    Applied(AffinityProfile),
    /// Statistics could not be fetched; the local profile is unchanged.
    StatsUnavailable(AffinityProfile),
    /// The store was reset or detached while fetching; nothing was applied.
    Discarded,
}

pub struct AffinityProfileStore {
    user: UserId,
    storage: Arc<dyn DurableStorage>,
    config: AffinityConfig,
    state: RwLock<ProfileState>,
    generation: AtomicU64,
    /// Serializes writes; holds the last revision written.
    written: Mutex<u64>,
}

impl AffinityProfileStore {
    pub fn new(user: UserId, storage: Arc<dyn DurableStorage>, config: AffinityConfig) -> Self {
        Self {
            user,
            storage,
            config,
            state: RwLock::new(ProfileState::default()),
            generation: AtomicU64::new(0),
            written: Mutex::new(0),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn config(&self) -> &AffinityConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Marks the current consumer as gone; results of work started before
    /// this call are discarded.
    pub fn detach(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn snapshot(&self) -> AffinityProfile {
        rw_read(&self.state, SOURCE, "snapshot").profile.clone()
    }

    pub fn is_hydrated(&self) -> bool {
        rw_read(&self.state, SOURCE, "is_hydrated").hydrated
    }

    /// Returns the profile, merging the persisted blob in on first call.
    ///
    /// A missing or corrupt blob counts as empty. When storage cannot be read
    /// the in-memory profile is returned and hydration is retried next time.
    pub async fn load(&self) -> AffinityProfile {
        if self.is_hydrated() {
            return self.snapshot();
        }

        let generation = self.generation();
        let key = storage_key(self.user);
        let persisted = match self.storage.get_item(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<AffinityProfile>(&raw) {
                Ok(profile) => profile,
                Err(err) => {
                    warn!(user = self.user, error = %err, "Stored affinity profile is corrupt, starting empty");
                    AffinityProfile::new()
                }
            },
            Ok(None) => AffinityProfile::new(),
            Err(err) => {
                warn!(user = self.user, error = %err, "Affinity profile read failed");
                return self.snapshot();
            }
        };

        if !self.is_current(generation) {
            debug!(user = self.user, "Discarding affinity profile load from stale generation");
            return self.snapshot();
        }

        let mut state = rw_write(&self.state, SOURCE, "load");
        if !state.hydrated {
            let local = std::mem::take(&mut state.profile);
            state.profile = persisted.merged(&local);
            state.hydrated = true;
            debug!(user = self.user, categories = state.profile.len(), "Affinity profile hydrated");
        }
        state.profile.clone()
    }

    /// Records a view lasting `duration`. Returns false when the view was too
    /// short to count.
    pub async fn record_view(self: &Arc<Self>, categories: &[Category], duration: StdDuration) -> bool {
        if duration < self.config.min_view_duration {
            debug!(
                user = self.user,
                duration_ms = duration.as_millis() as u64,
                "View below minimum duration ignored"
            );
            return false;
        }
        self.record(categories, Signal::View).await;
        true
    }

    pub async fn record_endorse(self: &Arc<Self>, categories: &[Category]) {
        self.record(categories, Signal::Endorse).await;
    }

    pub async fn record_save(self: &Arc<Self>, categories: &[Category]) {
        self.record(categories, Signal::Save).await;
    }

    async fn record(self: &Arc<Self>, categories: &[Category], signal: Signal) {
        if categories.is_empty() {
            return;
        }
        self.load().await;
        {
            let mut state = rw_write(&self.state, SOURCE, "record");
            state.profile.record_all(categories, signal);
            state.revision += 1;
        }
        self.schedule_persist();
    }

    /// Writes the latest snapshot in the background; failures are only logged.
    fn schedule_persist(self: &Arc<Self>) {
        let generation = self.generation();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(self);
                handle.spawn(async move {
                    if let Err(err) = store.persist(generation).await {
                        warn!(user = store.user, error = %err, "Background affinity profile write failed");
                    }
                });
            }
            Err(_) => {
                warn!(user = self.user, "No async runtime; affinity profile change not persisted");
            }
        }
    }

    /// Writes the latest snapshot now.
    pub async fn flush(&self) -> Result<(), StorageError> {
        self.persist(self.generation()).await
    }

    async fn persist(&self, generation: u64) -> Result<(), StorageError> {
        let mut written = self.written.lock().await;
        if !self.is_current(generation) {
            debug!(user = self.user, "Skipping affinity profile write from stale generation");
            return Ok(());
        }

        let (encoded, revision) = {
            let state = rw_read(&self.state, SOURCE, "persist");
            if !state.hydrated || state.revision <= *written {
                return Ok(());
            }
            let encoded = serde_json::to_string(&state.profile)
                .map_err(|err| StorageError::Io(format!("encode affinity profile: {err}")))?;
            (encoded, state.revision)
        };

        self.storage
            .set_item(&storage_key(self.user), &encoded)
            .await?;
        *written = revision;
        debug!(user = self.user, revision, "Affinity profile persisted");
        Ok(())
    }

    /// Clears the profile and deletes the persisted blob.
    pub async fn reset(&self) -> Result<(), StorageError> {
        let mut written = self.written.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = rw_write(&self.state, SOURCE, "reset");
            state.profile = AffinityProfile::new();
            state.revision += 1;
            state.hydrated = true;
            *written = state.revision;
        }
        self.storage.remove_item(&storage_key(self.user)).await?;
        info!(user = self.user, "Affinity profile reset");
        Ok(())
    }

    /// Folds the server's view of recent activity into the profile: per-day
    /// category counts become views, saved items become saves.
    ///
    /// A saved-items failure is ignored. A statistics failure leaves the
    /// profile untouched.
    pub async fn refresh(
        &self,
        stats: &dyn CategoryStatsSource,
        saved: &dyn SavedItemsSource,
        today: Date,
    ) -> RefreshOutcome {
        let generation = self.generation();
        let local = self.load().await;

        let start = today
            .checked_sub(Duration::days(i64::from(self.config.stats_window_days)))
            .unwrap_or(Date::MIN);
        let days = match stats.daily_stats(self.user, start, today).await {
            Ok(days) => days,
            Err(err) => {
                warn!(user = self.user, error = %err, "Category statistics unavailable, keeping local profile");
                return RefreshOutcome::StatsUnavailable(local);
            }
        };
        let mut delta = AffinityProfile::from_daily_stats(&days);

        match saved.saved_items(self.user, self.config.saved_items_limit).await {
            Ok(items) => delta.merge(&AffinityProfile::from_saved_items(&items)),
            Err(err) => {
                debug!(user = self.user, error = %err, "Saved items unavailable, skipping");
            }
        }

        let merged = {
            let mut state = rw_write(&self.state, SOURCE, "refresh");
            if !self.is_current(generation) {
                debug!(user = self.user, "Discarding affinity refresh from stale generation");
                return RefreshOutcome::Discarded;
            }
            state.profile.merge(&delta);
            state.revision += 1;
            state.profile.clone()
        };

        if let Err(err) = self.persist(generation).await {
            warn!(user = self.user, error = %err, "Affinity profile write after refresh failed");
        }
        info!(user = self.user, categories = merged.len(), "Affinity profile refreshed");
        RefreshOutcome::Applied(merged)
    }
}

/// One store per signed-in user, created on first use.
pub struct AffinityRegistry {
    storage: Arc<dyn DurableStorage>,
    config: AffinityConfig,
    stores: DashMap<UserId, Arc<AffinityProfileStore>>,
}

impl AffinityRegistry {
    pub fn new(storage: Arc<dyn DurableStorage>, config: AffinityConfig) -> Self {
        Self {
            storage,
            config,
            stores: DashMap::new(),
        }
    }

    pub fn for_user(&self, user: UserId) -> Arc<AffinityProfileStore> {
        self.stores
            .entry(user)
            .or_insert_with(|| {
                Arc::new(AffinityProfileStore::new(
                    user,
                    Arc::clone(&self.storage),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Drops the user's store and deletes their persisted profile.
    pub async fn logout(&self, user: UserId) -> Result<(), StorageError> {
        let store = match self.stores.remove(&user) {
            Some((_, store)) => store,
            None => Arc::new(AffinityProfileStore::new(
                user,
                Arc::clone(&self.storage),
                self.config.clone(),
            )),
        };
        store.reset().await
    }

    pub fn active_users(&self) -> usize {
        self.stores.len()
    }
}
