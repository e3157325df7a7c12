use chrono::NaiveTime;
use chrono_tz::Tz;
use std::{path::PathBuf, time::Duration};

pub trait Configuration: Clone + Send + Sync + 'static {
    fn admin_password(&self) -> String;
    fn port(&self) -> String;
    fn database_url(&self) -> Option<String>;
    fn cache_path(&self) -> Option<PathBuf>;
    fn timezone(&self) -> Tz;
    fn scheduling(&self) -> SchedulingConfig;
    fn read_retry_attempts(&self) -> u32;
    fn read_retry_backoff(&self) -> Duration;
    fn reservation_timeout(&self) -> Duration;
    fn notification_webhook_url(&self) -> Option<String>;
}

/// The part of the configuration the scheduling core reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingConfig {
    pub minimum_slot_minutes: i64,
    /// Span used for seeded slots and for auto-corrected end times.
    pub default_slot_minutes: i64,
    pub default_slot_title: String,
    pub working_hours_start: NaiveTime,
    pub working_hours_end: NaiveTime,
    pub seed_business_days: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            minimum_slot_minutes: 15,
            default_slot_minutes: 30,
            default_slot_title: "Consultation".into(),
            working_hours_start: NaiveTime::MIN + chrono::Duration::hours(9),
            working_hours_end: NaiveTime::MIN + chrono::Duration::hours(17),
            seed_business_days: 10,
        }
    }
}
