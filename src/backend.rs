use crate::{
    error::SchedulingResult,
    types::{ActorIdentity, CalendarData},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable home of the calendar. Every successful write assigns a strictly
/// increasing `last_updated`.
#[async_trait]
pub trait SlotStore: Clone + Send + Sync + 'static {
    async fn calendar_data(&self) -> SchedulingResult<CalendarData>;

    /// Replaces the stored calendar. Fails with `SyncConflict` when the stored
    /// `last_updated` is no longer `base_version`, the version the caller read.
    async fn save_calendar_data(
        &self,
        data: CalendarData,
        actor: &ActorIdentity,
        base_version: Option<DateTime<Utc>>,
    ) -> SchedulingResult<CalendarData>;

    /// Narrow conditional write used for reservations: `available = false`
    /// only succeeds on an available slot, `available = true` on a reserved
    /// one is applied and on an available one changes nothing.
    async fn update_slot_availability(
        &self,
        slot_id: &str,
        available: bool,
    ) -> SchedulingResult<CalendarData>;
}
