use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
#[cfg(test)]
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// The current calendar date in the service timezone.
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    timezone: Tz,
}

impl SystemClock {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    timezone: Tz,
}

#[cfg(test)]
impl FixedClock {
    pub fn new(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            timezone,
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut current) = self.now.lock() {
            *current = now;
        }
    }

    fn current(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.current()
    }

    fn today(&self) -> NaiveDate {
        self.current().with_timezone(&self.timezone).date_naive()
    }
}
