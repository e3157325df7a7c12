use crate::{
    backend::SlotStore,
    error::{SchedulingError, SchedulingResult},
    types::{ActorIdentity, CalendarData},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug, Default)]
struct StoredCalendar {
    data: CalendarData,
    updated_by: Option<ActorIdentity>,
}

/// Impersistent store, used when no database is configured.
#[derive(Debug, Clone, Default)]
pub struct LocalTimeslots {
    calendar: Arc<Mutex<StoredCalendar>>,
}

impl LocalTimeslots {
    fn lock(&self) -> SchedulingResult<MutexGuard<'_, StoredCalendar>> {
        self.calendar
            .lock()
            .map_err(|_| SchedulingError::PersistenceFailure("Local timeslot store poisoned".into()))
    }

    #[cfg(test)]
    fn updated_by(&self) -> Option<ActorIdentity> {
        self.lock().ok().and_then(|stored| stored.updated_by.clone())
    }
}

#[async_trait]
impl SlotStore for LocalTimeslots {
    async fn calendar_data(&self) -> SchedulingResult<CalendarData> {
        Ok(self.lock()?.data.clone())
    }

    async fn save_calendar_data(
        &self,
        mut data: CalendarData,
        actor: &ActorIdentity,
        base_version: Option<DateTime<Utc>>,
    ) -> SchedulingResult<CalendarData> {
        let mut stored = self.lock()?;
        if stored.data.last_updated != base_version {
            warn!(%actor, "Rejected save of outdated calendar");
            return Err(SchedulingError::SyncConflict);
        }

        data.last_updated = stored.data.last_updated;
        data.touch(Utc::now());
        stored.data = data;
        stored.updated_by = Some(actor.clone());
        info!(%actor, slots = stored.data.len(), "Saved calendar");
        Ok(stored.data.clone())
    }

    async fn update_slot_availability(
        &self,
        slot_id: &str,
        available: bool,
    ) -> SchedulingResult<CalendarData> {
        let mut stored = self.lock()?;
        if stored.data.set_availability(slot_id, available)? {
            stored.data.touch(Utc::now());
        }
        Ok(stored.data.clone())
    }
}
