use crate::{
    backend::SlotStore,
    error::{SchedulingError, SchedulingResult},
    schema::{calendar_meta, time_slots},
    types::{next_timestamp, ActorIdentity, CalendarData, TimeSlot},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use diesel::{ConnectionError, PgConnection};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const META_ID: i32 = 1;

#[derive(Debug, Queryable, Selectable, Insertable)]
#[diesel(table_name = time_slots)]
struct SlotRow {
    id: String,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    available: bool,
    title: String,
}

impl From<&TimeSlot> for SlotRow {
    fn from(slot: &TimeSlot) -> Self {
        Self {
            id: slot.id.clone(),
            date: slot.date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            available: slot.available,
            title: slot.title.clone(),
        }
    }
}

impl From<SlotRow> for TimeSlot {
    fn from(row: SlotRow) -> Self {
        Self {
            id: row.id,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            available: row.available,
            title: row.title,
        }
    }
}

impl From<diesel::result::Error> for SchedulingError {
    fn from(err: diesel::result::Error) -> Self {
        SchedulingError::PersistenceFailure(err.to_string())
    }
}

/// PostgreSQL backed store. All writes run in a transaction that first locks
/// the `calendar_meta` row, so version check and write are atomic.
#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
}

impl DatabaseInterface {
    pub fn new(database_url: &str) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, ConnectionError> {
        PgConnection::establish(database_url)
    }

    async fn run<T, F>(&self, operation: F) -> SchedulingResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> SchedulingResult<T> + Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = connection.lock().map_err(|_| {
                SchedulingError::PersistenceFailure("Database connection poisoned".into())
            })?;
            operation(&mut connection)
        })
        .await
        .map_err(|err| SchedulingError::PersistenceFailure(err.to_string()))?
    }
}

fn load_calendar(connection: &mut PgConnection) -> SchedulingResult<CalendarData> {
    let slots = time_slots::table
        .order((time_slots::date, time_slots::start_time))
        .select(SlotRow::as_select())
        .load(connection)?;

    let last_updated = calendar_meta::table
        .find(META_ID)
        .select(calendar_meta::last_updated)
        .first::<Option<DateTime<Utc>>>(connection)
        .optional()?
        .flatten();

    Ok(CalendarData::from_slots(
        slots.into_iter().map(TimeSlot::from),
        last_updated,
    ))
}

/// Locks the version row for the rest of the transaction and returns the
/// stored version.
fn lock_version(connection: &mut PgConnection) -> SchedulingResult<Option<DateTime<Utc>>> {
    diesel::insert_into(calendar_meta::table)
        .values(calendar_meta::id.eq(META_ID))
        .on_conflict_do_nothing()
        .execute(connection)?;

    Ok(calendar_meta::table
        .find(META_ID)
        .select(calendar_meta::last_updated)
        .for_update()
        .first::<Option<DateTime<Utc>>>(connection)?)
}

fn bump_version(
    connection: &mut PgConnection,
    stored: Option<DateTime<Utc>>,
    actor: &str,
) -> SchedulingResult<()> {
    diesel::update(calendar_meta::table.find(META_ID))
        .set((
            calendar_meta::last_updated.eq(Some(next_timestamp(stored, Utc::now()))),
            calendar_meta::updated_by.eq(actor),
        ))
        .execute(connection)?;
    Ok(())
}

#[async_trait]
impl SlotStore for DatabaseInterface {
    async fn calendar_data(&self) -> SchedulingResult<CalendarData> {
        self.run(load_calendar).await
    }

    async fn save_calendar_data(
        &self,
        data: CalendarData,
        actor: &ActorIdentity,
        base_version: Option<DateTime<Utc>>,
    ) -> SchedulingResult<CalendarData> {
        let actor = actor.clone();
        self.run(move |connection| {
            connection.transaction::<_, SchedulingError, _>(|connection| {
                let stored = lock_version(connection)?;
                if stored != base_version {
                    warn!(%actor, "Rejected save of outdated calendar");
                    return Err(SchedulingError::SyncConflict);
                }

                diesel::delete(time_slots::table).execute(connection)?;
                let rows: Vec<SlotRow> = data.slots().map(SlotRow::from).collect();
                if !rows.is_empty() {
                    diesel::insert_into(time_slots::table)
                        .values(&rows)
                        .execute(connection)?;
                }
                bump_version(connection, stored, &actor.0)?;

                info!(%actor, slots = rows.len(), "Saved calendar");
                load_calendar(connection)
            })
        })
        .await
    }

    async fn update_slot_availability(
        &self,
        slot_id: &str,
        available: bool,
    ) -> SchedulingResult<CalendarData> {
        let slot_id = slot_id.to_string();
        self.run(move |connection| {
            connection.transaction::<_, SchedulingError, _>(|connection| {
                let stored = lock_version(connection)?;
                let changed = diesel::update(
                    time_slots::table
                        .find(slot_id.as_str())
                        .filter(time_slots::available.eq(!available)),
                )
                .set(time_slots::available.eq(available))
                .execute(connection)?;

                if changed == 0 {
                    let current = time_slots::table
                        .find(slot_id.as_str())
                        .select(time_slots::available)
                        .first::<bool>(connection)
                        .optional()?;
                    return match current {
                        None => Err(SchedulingError::SlotNotFound(slot_id)),
                        Some(false) => Err(SchedulingError::SlotAlreadyReserved(slot_id)),
                        Some(true) => load_calendar(connection),
                    };
                }

                bump_version(connection, stored, "booking")?;
                load_calendar(connection)
            })
        })
        .await
    }
}
