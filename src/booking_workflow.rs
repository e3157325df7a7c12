use crate::{
    backend::SlotStore,
    error::{SchedulingError, SchedulingResult},
    notifications::{BookingNotification, BookingNotifier},
    scheduling_engine::SchedulingEngine,
    shared_calendar::SharedCalendar,
    sync_gateway::SyncGateway,
    types::{ActorIdentity, CalendarData, TimeSlot},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Contact details of the person booking. Validated before it gets here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingContact {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub topic: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum NotificationStatus {
    Delivered,
    /// The reservation stands, someone has to follow up by hand.
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub calendar: CalendarData,
    pub slot: TimeSlot,
    pub reference: Uuid,
    pub notification: NotificationStatus,
}

/// Public reservation protocol. The availability check and the durable
/// compare-and-set run inside the shared critical section, so of any number
/// of concurrent attempts on one slot exactly one wins.
#[derive(Clone)]
pub struct BookingWorkflow<S: SlotStore> {
    calendar: SharedCalendar,
    gateway: SyncGateway<S>,
    notifier: Arc<dyn BookingNotifier>,
    timeout: Duration,
    timezone: String,
}

impl<S: SlotStore> BookingWorkflow<S> {
    pub fn new(
        calendar: SharedCalendar,
        gateway: SyncGateway<S>,
        notifier: Arc<dyn BookingNotifier>,
        timeout: Duration,
        timezone: String,
    ) -> Self {
        Self {
            calendar,
            gateway,
            notifier,
            timeout,
            timezone,
        }
    }

    /// A failed notification does not undo the reservation: the outcome
    /// reports it and the slot stays taken until an administrator releases it.
    pub async fn reserve(
        &self,
        slot_id: &str,
        contact: BookingContact,
    ) -> SchedulingResult<BookingOutcome> {
        let (slot, calendar) = self.reserve_in_critical_section(slot_id).await?;

        let reference = Uuid::new_v4();
        let notification = self.notification(reference, &slot, contact);
        let notification = match self.notifier.notify(&notification).await {
            Ok(()) => NotificationStatus::Delivered,
            Err(err) => {
                error!(%reference, slot_id, ?err, "Booking notification failed, timeslot stays reserved");
                NotificationStatus::Failed(err.to_string())
            }
        };

        info!(%reference, slot_id, "Timeslot booked");
        Ok(BookingOutcome {
            calendar,
            slot,
            reference,
            notification,
        })
    }

    /// Explicit administrator action reopening a reserved slot.
    pub async fn release(
        &self,
        slot_id: &str,
        actor: &ActorIdentity,
    ) -> SchedulingResult<CalendarData> {
        let mut engine = timeout(self.timeout, self.calendar.lock())
            .await
            .map_err(|_| SchedulingError::Timeout)?;
        let before = engine.data().clone();
        engine.release(slot_id)?;

        match timeout(self.timeout, self.gateway.update_slot_availability(slot_id, true)).await {
            Ok(Ok(data)) => {
                engine.adopt(data);
                self.calendar.publish(&engine);
                info!(%actor, slot_id, "Timeslot released");
                Ok(engine.data().clone())
            }
            Ok(Err(err)) => {
                engine.replace(before);
                warn!(%actor, slot_id, ?err, "Failed to release timeslot");
                Err(err)
            }
            Err(_) => {
                engine.replace(before);
                self.resync(&mut engine).await;
                Err(SchedulingError::Timeout)
            }
        }
    }

    async fn reserve_in_critical_section(
        &self,
        slot_id: &str,
    ) -> SchedulingResult<(TimeSlot, CalendarData)> {
        let mut engine = timeout(self.timeout, self.calendar.lock())
            .await
            .map_err(|_| {
                warn!(slot_id, "Timed out waiting for the calendar");
                SchedulingError::Timeout
            })?;

        let before = engine.data().clone();
        let reserved = engine.reserve(slot_id)?;

        match timeout(self.timeout, self.gateway.update_slot_availability(slot_id, false)).await {
            Ok(Ok(data)) => {
                engine.adopt(data);
                self.calendar.publish(&engine);
                let slot = engine.data().get(slot_id).cloned().unwrap_or(reserved);
                Ok((slot, engine.data().clone()))
            }
            Ok(Err(err)) => {
                engine.replace(before);
                if matches!(
                    err,
                    SchedulingError::SlotAlreadyReserved(_) | SchedulingError::SlotNotFound(_)
                ) {
                    // the store knows better than our copy
                    self.resync(&mut engine).await;
                } else {
                    warn!(slot_id, ?err, "Failed to persist reservation");
                }
                Err(err)
            }
            Err(_) => {
                warn!(slot_id, "Timed out persisting reservation, outcome unknown");
                engine.replace(before);
                self.resync(&mut engine).await;
                Err(SchedulingError::Timeout)
            }
        }
    }

    async fn resync(&self, engine: &mut SchedulingEngine) {
        match timeout(self.timeout, self.gateway.fetch_authoritative()).await {
            Ok(Ok(data)) => {
                engine.adopt(data);
                self.calendar.publish(engine);
            }
            Ok(Err(err)) => warn!(?err, "Failed to resynchronise calendar"),
            Err(_) => warn!("Timed out resynchronising calendar"),
        }
    }

    fn notification(
        &self,
        reference: Uuid,
        slot: &TimeSlot,
        contact: BookingContact,
    ) -> BookingNotification {
        BookingNotification {
            reference,
            client_name: contact.name,
            client_email: contact.email,
            client_phone: contact.phone,
            client_company: contact.company,
            meeting_topic: contact.topic,
            meeting_message: contact.message,
            slot_id: slot.id.clone(),
            slot_date: slot.date,
            slot_start: slot.start_time,
            slot_end: slot.end_time,
            submitted_at: Utc::now(),
            timezone: self.timezone.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        cache::LocalCache,
        notifications::{MockBookingNotifier, NotificationError},
        sync_gateway::RetryPolicy,
        testutils::{slot, test_engine, MockSlotStore},
    };
    use std::sync::atomic::Ordering;

    const SLOT_ID: &str = "2024-06-10-19:00";

    async fn setup(
        notifier: MockBookingNotifier,
    ) -> (BookingWorkflow<MockSlotStore>, SharedCalendar, MockSlotStore) {
        let mock_store = MockSlotStore::with_slots([slot("2024-06-10", "19:00", "19:30")]).await;
        let gateway = SyncGateway::new(
            mock_store.clone(),
            LocalCache::default(),
            RetryPolicy {
                attempts: 1,
                initial_backoff: Duration::from_millis(1),
            },
        );
        let mut engine = test_engine("2024-06-10");
        engine.replace(gateway.load().await.unwrap().data);
        let calendar = SharedCalendar::new(engine);

        let workflow = BookingWorkflow::new(
            calendar.clone(),
            gateway,
            Arc::new(notifier),
            Duration::from_secs(2),
            "UTC".into(),
        );
        (workflow, calendar, mock_store)
    }

    fn contact() -> BookingContact {
        BookingContact {
            name: "Stefan".into(),
            email: "stefan@example.com".into(),
            topic: "Website".into(),
            ..Default::default()
        }
    }

    fn notifier(times: usize) -> MockBookingNotifier {
        let mut notifier = MockBookingNotifier::new();
        notifier.expect_notify().times(times).returning(|_| Ok(()));
        notifier
    }

    #[tokio::test]
    async fn test_reserve_twice() {
        let (workflow, calendar, mock_store) = setup(notifier(1)).await;

        let outcome = workflow.reserve(SLOT_ID, contact()).await.unwrap();
        assert!(!outcome.slot.available);
        assert_eq!(outcome.notification, NotificationStatus::Delivered);
        assert!(!calendar.snapshot().get(SLOT_ID).unwrap().available);

        let err = workflow.reserve(SLOT_ID, contact()).await.unwrap_err();
        assert_eq!(err, SchedulingError::SlotAlreadyReserved(SLOT_ID.into()));

        // the second attempt never reached the store
        assert_eq!(
            mock_store
                .0
                .calls_to_update_slot_availability
                .load(Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_notification_carries_booking_fields() {
        let mut notifier = MockBookingNotifier::new();
        notifier
            .expect_notify()
            .withf(|notification| {
                notification.slot_id == SLOT_ID
                    && notification.client_name == "Stefan"
                    && notification.client_email == "stefan@example.com"
                    && notification.meeting_topic == "Website"
                    && notification.timezone == "UTC"
            })
            .times(1)
            .returning(|_| Ok(()));
        let (workflow, _, _) = setup(notifier).await;

        workflow.reserve(SLOT_ID, contact()).await.unwrap();
    }

    #[tokio::test]
    async fn test_reserve_unknown_slot() {
        let (workflow, _, mock_store) = setup(notifier(0)).await;

        let err = workflow
            .reserve("2024-06-10-08:00", contact())
            .await
            .unwrap_err();
        assert_eq!(err, SchedulingError::SlotNotFound("2024-06-10-08:00".into()));
        assert_eq!(
            mock_store
                .0
                .calls_to_update_slot_availability
                .load(Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_failed_notification_keeps_reservation() {
        let mut notifier = MockBookingNotifier::new();
        notifier
            .expect_notify()
            .times(1)
            .returning(|_| Err(NotificationError("smtp down".into())));
        let (workflow, calendar, mock_store) = setup(notifier).await;

        let outcome = workflow.reserve(SLOT_ID, contact()).await.unwrap();
        assert!(matches!(outcome.notification, NotificationStatus::Failed(_)));
        assert!(!calendar.snapshot().get(SLOT_ID).unwrap().available);

        let stored = mock_store.0.store.calendar_data().await.unwrap();
        assert!(!stored.get(SLOT_ID).unwrap().available);
    }

    #[tokio::test]
    async fn test_persistence_failure_leaves_slot_available() {
        let (workflow, calendar, mock_store) = setup(notifier(0)).await;
        mock_store.set_success(false);

        let err = workflow.reserve(SLOT_ID, contact()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_user_facing());
        assert!(calendar.snapshot().get(SLOT_ID).unwrap().available);
        assert!(calendar.lock().await.data().get(SLOT_ID).unwrap().available);
    }

    #[tokio::test]
    async fn test_store_wins_over_stale_copy() {
        let (workflow, calendar, mock_store) = setup(notifier(0)).await;
        // booked through another instance sharing the store
        mock_store
            .0
            .store
            .update_slot_availability(SLOT_ID, false)
            .await
            .unwrap();
        assert!(calendar.snapshot().get(SLOT_ID).unwrap().available);

        let err = workflow.reserve(SLOT_ID, contact()).await.unwrap_err();
        assert_eq!(err, SchedulingError::SlotAlreadyReserved(SLOT_ID.into()));
        assert!(!calendar.snapshot().get(SLOT_ID).unwrap().available);
    }

    #[tokio::test]
    async fn test_reserve_times_out() {
        let (workflow, calendar, mock_store) = setup(notifier(0)).await;
        let workflow = BookingWorkflow {
            timeout: Duration::from_millis(50),
            ..workflow
        };
        mock_store.set_delay(Duration::from_millis(500));

        let err = workflow.reserve(SLOT_ID, contact()).await.unwrap_err();
        assert_eq!(err, SchedulingError::Timeout);
        assert!(err.is_retryable());
        assert!(calendar.snapshot().get(SLOT_ID).unwrap().available);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations() {
        const ATTEMPTS: usize = 16;
        let (workflow, calendar, mock_store) = setup(notifier(1)).await;

        let handles: Vec<_> = (0..ATTEMPTS)
            .map(|_| {
                let workflow = workflow.clone();
                tokio::spawn(async move { workflow.reserve(SLOT_ID, contact()).await })
            })
            .collect();

        let mut successes = 0;
        let mut already_reserved = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(SchedulingError::SlotAlreadyReserved(_)) => already_reserved += 1,
                Err(err) => panic!("Unexpected error: {err}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(already_reserved, ATTEMPTS - 1);
        assert!(!calendar.snapshot().get(SLOT_ID).unwrap().available);
        let stored = mock_store.0.store.calendar_data().await.unwrap();
        assert!(!stored.get(SLOT_ID).unwrap().available);
    }

    #[tokio::test]
    async fn test_release_reopens_slot() {
        let (workflow, calendar, _) = setup(notifier(2)).await;
        let admin = ActorIdentity::new("admin");

        workflow.reserve(SLOT_ID, contact()).await.unwrap();
        let released = workflow.release(SLOT_ID, &admin).await.unwrap();
        assert!(released.get(SLOT_ID).unwrap().available);
        assert!(calendar.snapshot().get(SLOT_ID).unwrap().available);

        workflow.reserve(SLOT_ID, contact()).await.unwrap();
        assert_eq!(
            workflow.release("nope", &admin).await.unwrap_err(),
            SchedulingError::SlotNotFound("nope".into())
        );
    }
}
