use crate::{
    backend::SlotStore,
    error::{SchedulingError, SchedulingResult},
    scheduling_engine::{EndTimePolicy, SchedulingEngine, SlotDraft},
    shared_calendar::SharedCalendar,
    sync_gateway::{DataSource, SyncGateway},
    types::{ActorIdentity, CalendarData, TimeSlot},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "removed", rename_all = "snake_case")]
pub enum CleanPastOutcome {
    Removed(usize),
    NothingToRemove,
}

/// An administrator editing session. Edits are staged on a private copy of
/// the calendar and only reach the store on `commit`, which is conditional on
/// the store still holding the version the session was loaded from.
pub struct AdminWorkflow<S: SlotStore> {
    calendar: SharedCalendar,
    gateway: SyncGateway<S>,
    staged: SchedulingEngine,
    base_version: Option<DateTime<Utc>>,
    source: DataSource,
    dirty: bool,
    timeout: Duration,
}

impl<S: SlotStore> AdminWorkflow<S> {
    pub async fn open(
        calendar: SharedCalendar,
        gateway: SyncGateway<S>,
        timeout: Duration,
    ) -> SchedulingResult<Self> {
        let staged = calendar.lock().await.clone();
        let mut session = Self {
            calendar,
            gateway,
            staged,
            base_version: None,
            source: DataSource::Remote,
            dirty: false,
            timeout,
        };
        session.reload().await?;
        Ok(session)
    }

    pub fn staged(&self) -> &CalendarData {
        self.staged.data()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn source(&self) -> DataSource {
        self.source
    }

    pub fn slots_for_date(&self, date: NaiveDate) -> Vec<TimeSlot> {
        self.staged.list_for_date(date)
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.staged.list_distinct_dates()
    }

    pub fn stage_create(&mut self, draft: SlotDraft) -> SchedulingResult<TimeSlot> {
        let slot = self.staged.create_slot(draft)?;
        self.dirty = true;
        Ok(slot)
    }

    pub fn stage_edit(
        &mut self,
        id: &str,
        draft: SlotDraft,
        policy: EndTimePolicy,
    ) -> SchedulingResult<TimeSlot> {
        let slot = self.staged.edit_slot(id, draft, policy)?;
        self.dirty = true;
        Ok(slot)
    }

    pub fn stage_delete(&mut self, id: &str) -> SchedulingResult<TimeSlot> {
        let slot = self.staged.delete_slot(id)?;
        self.dirty = true;
        Ok(slot)
    }

    pub fn stage_toggle(&mut self, id: &str) -> SchedulingResult<TimeSlot> {
        let slot = self.staged.toggle_availability(id)?;
        self.dirty = true;
        Ok(slot)
    }

    /// Stages the removal of every slot dated before today.
    pub fn clean_past(&mut self) -> CleanPastOutcome {
        let today = self.staged.today();
        match self.staged.purge_past(today) {
            0 => CleanPastOutcome::NothingToRemove,
            removed => {
                self.dirty = true;
                CleanPastOutcome::Removed(removed)
            }
        }
    }

    /// Persists the staged calendar. Runs inside the same critical section as
    /// reservations; a reservation that landed since the session was loaded
    /// makes this fail with `SyncConflict`. Waiting for the calendar and for
    /// the store are each bounded by the session timeout. On any failure the
    /// staged edits and the dirty flag are kept.
    pub async fn commit(&mut self, actor: &ActorIdentity) -> SchedulingResult<CalendarData> {
        if !self.dirty {
            return Ok(self.staged.data().clone());
        }

        let mut authoritative = timeout(self.timeout, self.calendar.lock())
            .await
            .map_err(|_| {
                warn!(%actor, "Timed out waiting for the calendar");
                SchedulingError::Timeout
            })?;
        let save = self
            .gateway
            .save(self.staged.data().clone(), actor, self.base_version);
        let saved = match timeout(self.timeout, save).await {
            Ok(Ok(saved)) => saved,
            Ok(Err(SchedulingError::SyncConflict)) => {
                warn!(%actor, "Calendar changed since it was loaded, reload required");
                return Err(SchedulingError::SyncConflict);
            }
            Ok(Err(err)) => {
                error!(%actor, ?err, "Failed to commit calendar");
                return Err(err);
            }
            Err(_) => {
                // the save may still land, the next commit then hits SyncConflict
                warn!(%actor, "Timed out committing calendar, outcome unknown");
                return Err(SchedulingError::Timeout);
            }
        };
        authoritative.adopt(saved.clone());
        self.calendar.publish(&authoritative);
        drop(authoritative);

        self.staged.replace(saved.clone());
        self.base_version = saved.last_updated;
        self.source = DataSource::Remote;
        self.dirty = false;
        info!(%actor, slots = saved.len(), "Committed calendar");
        Ok(saved)
    }

    /// Throws away staged edits and reloads. Refuses to do so silently:
    /// with unsaved changes `confirm` has to be set.
    pub async fn discard(&mut self, confirm: bool) -> SchedulingResult<CalendarData> {
        if self.dirty && !confirm {
            return Err(SchedulingError::UnsavedChanges);
        }
        if self.dirty {
            info!("Discarding staged calendar changes");
        }
        self.reload().await
    }

    /// Picks up changes made elsewhere, unless there are staged edits.
    pub async fn refresh(&mut self) -> SchedulingResult<CalendarData> {
        if self.dirty {
            return Ok(self.staged.data().clone());
        }
        self.reload().await
    }

    async fn reload(&mut self) -> SchedulingResult<CalendarData> {
        let loaded = self.gateway.load().await?;
        if loaded.source == DataSource::Cache {
            warn!("Admin session runs on the cached calendar, commits will fail until the store is back");
        }
        self.base_version = loaded.data.last_updated;
        self.source = loaded.source;
        self.staged.replace(loaded.data);
        self.dirty = false;
        Ok(self.staged.data().clone())
    }
}
