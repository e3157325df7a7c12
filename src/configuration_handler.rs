use crate::configuration::{Configuration, SchedulingConfig};
use chrono::NaiveTime;
use chrono_tz::Tz;
use clap::Parser;
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Appointment slot booking service")]
pub struct ConfigurationHandler {
    /// Password expected in the x-admin-password header
    #[arg(long, env = "ADMIN_PASSWORD", default_value = "123")]
    admin_password: String,

    #[arg(long, env = "PORT", default_value = "3000")]
    port: String,

    /// PostgreSQL connection. Without it timeslots are kept in memory only
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// JSON file holding the last known calendar
    #[arg(long, env = "CACHE_PATH")]
    cache_path: Option<PathBuf>,

    #[arg(long, env = "TIMEZONE", default_value = "Europe/Vienna")]
    timezone: Tz,

    #[arg(long, env = "MINIMUM_SLOT_MINUTES", default_value_t = 15)]
    minimum_slot_minutes: i64,

    #[arg(long, env = "DEFAULT_SLOT_MINUTES", default_value_t = 30)]
    default_slot_minutes: i64,

    #[arg(long, env = "DEFAULT_SLOT_TITLE", default_value = "Consultation")]
    default_slot_title: String,

    #[arg(long, env = "WORKING_HOURS_START", default_value = "09:00", value_parser = parse_time)]
    working_hours_start: NaiveTime,

    #[arg(long, env = "WORKING_HOURS_END", default_value = "17:00", value_parser = parse_time)]
    working_hours_end: NaiveTime,

    /// Business days filled with default timeslots when there is no calendar yet
    #[arg(long, env = "SEED_BUSINESS_DAYS", default_value_t = 10)]
    seed_business_days: u32,

    #[arg(long, env = "READ_RETRY_ATTEMPTS", default_value_t = 3)]
    read_retry_attempts: u32,

    #[arg(long, env = "READ_RETRY_BACKOFF_MS", default_value_t = 200)]
    read_retry_backoff_ms: u64,

    #[arg(long, env = "RESERVATION_TIMEOUT_MS", default_value_t = 3000)]
    reservation_timeout_ms: u64,

    /// Bookings are posted here as JSON. Without it they are only logged
    #[arg(long, env = "NOTIFICATION_WEBHOOK_URL")]
    notification_webhook_url: Option<String>,
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|err| format!("Expected HH:MM: {err}"))
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn admin_password(&self) -> String {
        self.admin_password.clone()
    }

    fn port(&self) -> String {
        self.port.clone()
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn cache_path(&self) -> Option<PathBuf> {
        self.cache_path.clone()
    }

    fn timezone(&self) -> Tz {
        self.timezone
    }

    fn scheduling(&self) -> SchedulingConfig {
        SchedulingConfig {
            minimum_slot_minutes: self.minimum_slot_minutes,
            default_slot_minutes: self.default_slot_minutes,
            default_slot_title: self.default_slot_title.clone(),
            working_hours_start: self.working_hours_start,
            working_hours_end: self.working_hours_end,
            seed_business_days: self.seed_business_days,
        }
    }

    fn read_retry_attempts(&self) -> u32 {
        self.read_retry_attempts
    }

    fn read_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.read_retry_backoff_ms)
    }

    fn reservation_timeout(&self) -> Duration {
        Duration::from_millis(self.reservation_timeout_ms)
    }

    fn notification_webhook_url(&self) -> Option<String> {
        self.notification_webhook_url.clone()
    }
}
