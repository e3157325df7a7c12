use crate::{scheduling_engine::SchedulingEngine, types::CalendarData};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// The authoritative calendar of the running service.
///
/// Every mutation of the authoritative state (reservations, releases, admin
/// commits) happens while holding `lock()`, which makes that the single
/// critical section. Readers never lock: they get the last published
/// snapshot, at most one version old.
#[derive(Clone)]
pub struct SharedCalendar {
    engine: Arc<Mutex<SchedulingEngine>>,
    sender: Arc<watch::Sender<CalendarData>>,
}

impl SharedCalendar {
    pub fn new(engine: SchedulingEngine) -> Self {
        let (sender, _) = watch::channel(engine.data().clone());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            sender: Arc::new(sender),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, SchedulingEngine> {
        self.engine.lock().await
    }

    /// Makes the engine's current state visible to readers.
    pub fn publish(&self, engine: &SchedulingEngine) {
        debug!(slots = engine.data().len(), "Publishing calendar");
        self.sender.send_replace(engine.data().clone());
    }

    pub fn snapshot(&self) -> CalendarData {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> WatchStream<CalendarData> {
        WatchStream::new(self.sender.subscribe())
    }
}
