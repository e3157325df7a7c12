use crate::{
    admin_workflow::AdminWorkflow,
    backend::SlotStore,
    booking_workflow::BookingWorkflow,
    cache::LocalCache,
    clock::Clock,
    configuration::Configuration,
    error::SchedulingResult,
    notifications::{BookingNotifier, LogNotifier, WebhookNotifier},
    scheduling_engine::SchedulingEngine,
    shared_calendar::SharedCalendar,
    sync_gateway::{DataSource, RetryPolicy, SyncGateway},
    types::ActorIdentity,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState<S: SlotStore> {
    pub calendar: SharedCalendar,
    pub gateway: SyncGateway<S>,
    pub booking: BookingWorkflow<S>,
    pub admin: Arc<Mutex<AdminWorkflow<S>>>,
}

/// Loads the calendar, seeds a never used store with default timeslots and
/// wires up the workflows.
pub async fn bootstrap<S, C>(
    store: S,
    configuration: &C,
    clock: Arc<dyn Clock>,
) -> SchedulingResult<AppState<S>>
where
    S: SlotStore,
    C: Configuration,
{
    let retry = RetryPolicy {
        attempts: configuration.read_retry_attempts(),
        initial_backoff: configuration.read_retry_backoff(),
    };
    let gateway = SyncGateway::new(store, LocalCache::new(configuration.cache_path()), retry);

    let loaded = gateway.load().await?;
    let mut engine = SchedulingEngine::new(configuration.scheduling(), clock);
    engine.replace(loaded.data.clone());

    if loaded.source == DataSource::Remote && !loaded.data.has_prior_data() {
        let seeded = engine.seed_working_hours();
        match gateway
            .save(engine.data().clone(), &ActorIdentity::system(), None)
            .await
        {
            Ok(saved) => {
                info!(seeded, "Filled empty calendar with default timeslots");
                engine.replace(saved);
            }
            Err(err) => {
                warn!(?err, "Failed to store default timeslots, starting empty");
                engine.replace(loaded.data);
            }
        }
    }

    let current = engine.data().clone();
    engine.adopt(current);

    let calendar = SharedCalendar::new(engine);
    let booking = BookingWorkflow::new(
        calendar.clone(),
        gateway.clone(),
        notifier(configuration),
        configuration.reservation_timeout(),
        configuration.timezone().name().to_string(),
    );
    let admin = AdminWorkflow::open(
        calendar.clone(),
        gateway.clone(),
        configuration.reservation_timeout(),
    )
    .await?;

    info!(
        slots = calendar.snapshot().len(),
        source = ?loaded.source,
        "Calendar ready"
    );
    Ok(AppState {
        calendar,
        gateway,
        booking,
        admin: Arc::new(Mutex::new(admin)),
    })
}

fn notifier<C: Configuration>(configuration: &C) -> Arc<dyn BookingNotifier> {
    let Some(url) = configuration.notification_webhook_url() else {
        return Arc::new(LogNotifier);
    };
    match WebhookNotifier::new(url, configuration.reservation_timeout()) {
        Ok(notifier) => Arc::new(notifier),
        Err(err) => {
            warn!(?err, "Invalid notification webhook, bookings are only logged");
            Arc::new(LogNotifier)
        }
    }
}
