use crate::{
    backend::SlotStore,
    cache::LocalCache,
    error::{SchedulingError, SchedulingResult},
    types::{ActorIdentity, CalendarData},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Remote,
    /// The store could not be reached, the data is the last cached copy.
    Cache,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub data: CalendarData,
    pub source: DataSource,
}

/// Mediates between the durable store and the local cache: read-through with
/// bounded retries on load, write-through on mutation, cache-only reads while
/// the store is unreachable. Writes are never retried.
#[derive(Clone)]
pub struct SyncGateway<S: SlotStore> {
    store: S,
    cache: LocalCache,
    retry: RetryPolicy,
    degraded: Arc<AtomicBool>,
}

impl<S: SlotStore> SyncGateway<S> {
    pub fn new(store: S, cache: LocalCache, retry: RetryPolicy) -> Self {
        Self {
            store,
            cache,
            retry,
            degraded: Arc::default(),
        }
    }

    /// Whether the last interaction with the store failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub async fn load(&self) -> SchedulingResult<Loaded> {
        match self.fetch_authoritative().await {
            Ok(data) => Ok(Loaded {
                data,
                source: DataSource::Remote,
            }),
            Err(err) => match self.cache.read() {
                Some(data) => {
                    warn!(?err, "Calendar store unreachable, serving cached calendar");
                    Ok(Loaded {
                        data,
                        source: DataSource::Cache,
                    })
                }
                None => {
                    error!(?err, "Calendar store unreachable and nothing cached");
                    Err(err)
                }
            },
        }
    }

    /// Reads the store, retrying transient failures, and never falls back to
    /// the cache.
    pub async fn fetch_authoritative(&self) -> SchedulingResult<CalendarData> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.store.calendar_data().await {
                Ok(data) => {
                    self.mark_reachable();
                    self.refresh_cache(&data);
                    return Ok(data);
                }
                Err(err) if err.is_retryable() && attempt < self.retry.attempts => {
                    warn!(?err, attempt, "Failed to read calendar. Retry in {backoff:?}");
                    sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    self.mark_unreachable(&err);
                    return Err(err);
                }
            }
        }
    }

    pub async fn save(
        &self,
        data: CalendarData,
        actor: &ActorIdentity,
        base_version: Option<DateTime<Utc>>,
    ) -> SchedulingResult<CalendarData> {
        let result = self.store.save_calendar_data(data, actor, base_version).await;
        self.write_through(result)
    }

    pub async fn update_slot_availability(
        &self,
        slot_id: &str,
        available: bool,
    ) -> SchedulingResult<CalendarData> {
        let result = self.store.update_slot_availability(slot_id, available).await;
        self.write_through(result)
    }

    fn write_through(&self, result: SchedulingResult<CalendarData>) -> SchedulingResult<CalendarData> {
        match result {
            Ok(data) => {
                self.mark_reachable();
                self.refresh_cache(&data);
                Ok(data)
            }
            Err(err) => {
                self.mark_unreachable(&err);
                Err(err)
            }
        }
    }

    fn refresh_cache(&self, data: &CalendarData) {
        if let Some(cached) = self.cache.read() {
            if cached.last_updated > data.last_updated {
                warn!(
                    cached = ?cached.last_updated,
                    remote = ?data.last_updated,
                    "Local cache is ahead of the store, discarding it"
                );
            } else if !cached.same_slots(data) {
                debug!("Local cache was stale");
            }
        }

        if let Err(err) = self.cache.write(data) {
            warn!(?err, "Failed to update calendar cache");
        }
    }

    fn mark_reachable(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!("Calendar store reachable again");
        }
    }

    fn mark_unreachable(&self, err: &SchedulingError) {
        if err.is_retryable() {
            self.degraded.store(true, Ordering::SeqCst);
        }
    }
}
