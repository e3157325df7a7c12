use crate::{
    backend::SlotStore,
    clock::FixedClock,
    configuration::{Configuration, SchedulingConfig},
    error::{SchedulingError, SchedulingResult},
    local_timeslots::LocalTimeslots,
    scheduling_engine::{SchedulingEngine, SlotDraft},
    types::{ActorIdentity, CalendarData, TimeSlot},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

pub fn date(value: &str) -> NaiveDate {
    value.parse().unwrap()
}

pub fn time(value: &str) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M").unwrap()
}

pub fn slot(day: &str, start: &str, end: &str) -> TimeSlot {
    TimeSlot::new(date(day), time(start), time(end), "Consultation".into())
}

pub fn draft(day: &str, start: &str, end: &str) -> SlotDraft {
    SlotDraft {
        date: date(day),
        start_time: time(start),
        end_time: time(end),
        title: None,
    }
}

/// 08:00 UTC on the given day.
pub fn test_clock(today: &str) -> Arc<FixedClock> {
    let today = date(today);
    let now = Utc
        .from_utc_datetime(&today.and_hms_opt(8, 0, 0).unwrap());
    Arc::new(FixedClock::new(now, chrono_tz::UTC))
}

pub fn test_engine(today: &str) -> SchedulingEngine {
    SchedulingEngine::new(SchedulingConfig::default(), test_clock(today))
}

/// Fast retries, no cache file, UTC.
#[derive(Debug, Clone)]
pub struct TestConfiguration {
    pub admin_password: String,
    pub scheduling: SchedulingConfig,
    pub cache_path: Option<PathBuf>,
    pub reservation_timeout: Duration,
    pub notification_webhook_url: Option<String>,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            admin_password: "123".into(),
            scheduling: SchedulingConfig::default(),
            cache_path: None,
            reservation_timeout: Duration::from_secs(2),
            notification_webhook_url: None,
        }
    }
}

impl Configuration for TestConfiguration {
    fn admin_password(&self) -> String {
        self.admin_password.clone()
    }

    fn port(&self) -> String {
        "0".into()
    }

    fn database_url(&self) -> Option<String> {
        None
    }

    fn cache_path(&self) -> Option<PathBuf> {
        self.cache_path.clone()
    }

    fn timezone(&self) -> Tz {
        chrono_tz::UTC
    }

    fn scheduling(&self) -> SchedulingConfig {
        self.scheduling.clone()
    }

    fn read_retry_attempts(&self) -> u32 {
        1
    }

    fn read_retry_backoff(&self) -> Duration {
        Duration::from_millis(1)
    }

    fn reservation_timeout(&self) -> Duration {
        self.reservation_timeout
    }

    fn notification_webhook_url(&self) -> Option<String> {
        self.notification_webhook_url.clone()
    }
}

pub struct MockSlotStoreInner {
    pub success: AtomicBool,
    pub delay_ms: AtomicU64,
    pub calls_to_calendar_data: AtomicU64,
    pub calls_to_save_calendar_data: AtomicU64,
    pub calls_to_update_slot_availability: AtomicU64,
    pub store: LocalTimeslots,
}

/// Real in-memory semantics plus call counters, failure injection and an
/// artificial delay.
#[derive(Clone)]
pub struct MockSlotStore(pub Arc<MockSlotStoreInner>);

impl MockSlotStoreInner {
    fn new() -> Self {
        Self {
            success: AtomicBool::new(true),
            delay_ms: AtomicU64::default(),
            calls_to_calendar_data: AtomicU64::default(),
            calls_to_save_calendar_data: AtomicU64::default(),
            calls_to_update_slot_availability: AtomicU64::default(),
            store: LocalTimeslots::default(),
        }
    }
}

impl MockSlotStore {
    pub fn new() -> Self {
        Self(Arc::new(MockSlotStoreInner::new()))
    }

    pub async fn with_slots(slots: impl IntoIterator<Item = TimeSlot>) -> Self {
        let mock_store = Self::new();
        mock_store
            .0
            .store
            .save_calendar_data(
                CalendarData::from_slots(slots, None),
                &ActorIdentity::system(),
                None,
            )
            .await
            .unwrap();
        mock_store
    }

    pub fn set_success(&self, success: bool) {
        self.0.success.store(success, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.0
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn result(&self) -> SchedulingResult<()> {
        let delay = self.0.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        match self.0.success.load(Ordering::SeqCst) {
            true => Ok(()),
            false => Err(SchedulingError::PersistenceFailure("Supposed to fail".into())),
        }
    }
}

#[async_trait]
impl SlotStore for MockSlotStore {
    async fn calendar_data(&self) -> SchedulingResult<CalendarData> {
        self.0.calls_to_calendar_data.fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.0.store.calendar_data().await
    }

    async fn save_calendar_data(
        &self,
        data: CalendarData,
        actor: &ActorIdentity,
        base_version: Option<DateTime<Utc>>,
    ) -> SchedulingResult<CalendarData> {
        self.0
            .calls_to_save_calendar_data
            .fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.0
            .store
            .save_calendar_data(data, actor, base_version)
            .await
    }

    async fn update_slot_availability(
        &self,
        slot_id: &str,
        available: bool,
    ) -> SchedulingResult<CalendarData> {
        self.0
            .calls_to_update_slot_availability
            .fetch_add(1, Ordering::SeqCst);
        self.result().await?;
        self.0
            .store
            .update_slot_availability(slot_id, available)
            .await
    }
}
