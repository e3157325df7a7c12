use crate::{
    admin_workflow::{AdminWorkflow, CleanPastOutcome},
    backend::SlotStore,
    booking_workflow::{BookingContact, BookingOutcome},
    configuration::Configuration,
    error::SchedulingError,
    scheduling_engine::{EndTimePolicy, SlotDraft},
    startup::AppState,
    sync_gateway::DataSource,
    types::{ActorIdentity, CalendarData, TimeSlot},
};
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use futures::{Stream, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};
use validator::{Validate, ValidationErrors};

lazy_static! {
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9 ()/-]{6,20}$").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct BookingRequest {
    slot_id: String,
    #[validate(length(min = 1, max = 100))]
    name: String,
    #[validate(email)]
    email: String,
    #[validate(regex(path = *PHONE_REGEX))]
    phone: String,
    #[serde(default)]
    #[validate(length(max = 100))]
    company: String,
    #[validate(length(min = 1, max = 200))]
    topic: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    message: String,
}

impl BookingRequest {
    fn into_parts(self) -> (String, BookingContact) {
        let contact = BookingContact {
            name: self.name,
            email: self.email,
            phone: self.phone,
            company: self.company,
            topic: self.topic,
            message: self.message,
        };
        (self.slot_id, contact)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotIdRequest {
    id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EditSlotRequest {
    id: String,
    #[serde(flatten)]
    draft: SlotDraft,
    #[serde(default)]
    policy: EndTimePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DiscardRequest {
    #[serde(default)]
    confirm: bool,
}

#[derive(Debug, Clone, Serialize)]
struct SessionView {
    calendar: CalendarData,
    dirty: bool,
    source: DataSource,
    degraded: bool,
}

impl SessionView {
    fn new<S: SlotStore>(session: &AdminWorkflow<S>, degraded: bool) -> Self {
        Self {
            calendar: session.staged().clone(),
            dirty: session.is_dirty(),
            source: session.source(),
            degraded,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

enum ApiError {
    Scheduling(SchedulingError),
    Validation(ValidationErrors),
}

impl From<SchedulingError> for ApiError {
    fn from(err: SchedulingError) -> Self {
        Self::Scheduling(err)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        Self::Validation(err)
    }
}

fn status_code(err: &SchedulingError) -> StatusCode {
    match err {
        SchedulingError::InvalidOrder
        | SchedulingError::TooShort { .. }
        | SchedulingError::PastDate => StatusCode::UNPROCESSABLE_ENTITY,
        SchedulingError::NotFound(_) | SchedulingError::SlotNotFound(_) => StatusCode::NOT_FOUND,
        SchedulingError::DuplicateSlot(_)
        | SchedulingError::SlotAlreadyReserved(_)
        | SchedulingError::SyncConflict => StatusCode::CONFLICT,
        SchedulingError::UnsavedChanges => StatusCode::PRECONDITION_FAILED,
        SchedulingError::PersistenceFailure(_) | SchedulingError::Timeout => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::Scheduling(err) => {
                if err.is_user_facing() {
                    debug!(%err, "Request rejected");
                } else {
                    warn!(%err, "Request failed");
                }
                (status_code(&err), err.to_string())
            }
            Self::Validation(err) => {
                debug!(%err, "Invalid booking request");
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

pub fn create_app<S: SlotStore, C: Configuration>(state: AppState<S>, configuration: &C) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/calendar", get(get_calendar::<S>))
        .route("/calendar/dates", get(get_dates::<S>))
        .route("/calendar/stream", get(calendar_stream::<S>))
        .route("/calendar/:date", get(get_slots_for_date::<S>))
        .route("/book", post(book_timeslot::<S>));

    let admin = Router::new()
        .route("/admin/session", get(get_session::<S>))
        .route("/admin/calendar/dates", get(get_staged_dates::<S>))
        .route("/admin/calendar/:date", get(get_staged_slots_for_date::<S>))
        .route("/admin/slots/create", post(create_slot::<S>))
        .route("/admin/slots/edit", post(edit_slot::<S>))
        .route("/admin/slots/delete", post(delete_slot::<S>))
        .route("/admin/slots/toggle", post(toggle_slot::<S>))
        .route("/admin/commit", post(commit::<S>))
        .route("/admin/discard", post(discard::<S>))
        .route("/admin/clean_past", post(clean_past::<S>))
        .route("/admin/release", post(release_slot::<S>))
        .route_layer(middleware::from_fn_with_state(
            configuration.admin_password(),
            admin_auth,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(cors)
}

async fn admin_auth(
    State(admin_password): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    if let Some(auth_header) = request.headers().get("x-admin-password") {
        if auth_header.to_str().unwrap_or("") != admin_password {
            return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()));
        }
    } else {
        return Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string()));
    }
    Ok(next.run(request).await)
}

/// Name the administrator gave in `x-admin-identity`, used for audit only.
fn actor(headers: &HeaderMap) -> ActorIdentity {
    headers
        .get("x-admin-identity")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ActorIdentity::new)
        .unwrap_or_else(|| ActorIdentity::new("admin"))
}

async fn get_calendar<S: SlotStore>(State(state): State<AppState<S>>) -> Json<CalendarData> {
    Json(state.calendar.snapshot())
}

async fn get_dates<S: SlotStore>(State(state): State<AppState<S>>) -> Json<Vec<NaiveDate>> {
    Json(state.calendar.snapshot().distinct_dates())
}

async fn get_slots_for_date<S: SlotStore>(
    State(state): State<AppState<S>>,
    Path(date): Path<NaiveDate>,
) -> Json<Vec<TimeSlot>> {
    Json(state.calendar.snapshot().slots_for_date(date))
}

async fn calendar_stream<S: SlotStore>(
    State(state): State<AppState<S>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!("Calendar subscriber connected");
    let stream = state
        .calendar
        .subscribe()
        .map(|data| Event::default().event("calendar").json_data(data));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn book_timeslot<S: SlotStore>(
    State(state): State<AppState<S>>,
    Json(booking): Json<BookingRequest>,
) -> Result<Json<BookingOutcome>, ApiError> {
    booking.validate()?;
    let (slot_id, contact) = booking.into_parts();
    let outcome = state.booking.reserve(&slot_id, contact).await?;
    Ok(Json(outcome))
}

async fn get_session<S: SlotStore>(
    State(state): State<AppState<S>>,
) -> Result<Json<SessionView>, ApiError> {
    let mut session = state.admin.lock().await;
    session.refresh().await?;
    Ok(Json(SessionView::new(&session, state.gateway.is_degraded())))
}

async fn get_staged_dates<S: SlotStore>(State(state): State<AppState<S>>) -> Json<Vec<NaiveDate>> {
    Json(state.admin.lock().await.dates())
}

async fn get_staged_slots_for_date<S: SlotStore>(
    State(state): State<AppState<S>>,
    Path(date): Path<NaiveDate>,
) -> Json<Vec<TimeSlot>> {
    Json(state.admin.lock().await.slots_for_date(date))
}

async fn create_slot<S: SlotStore>(
    State(state): State<AppState<S>>,
    Json(draft): Json<SlotDraft>,
) -> Result<Json<TimeSlot>, ApiError> {
    let slot = state.admin.lock().await.stage_create(draft)?;
    Ok(Json(slot))
}

async fn edit_slot<S: SlotStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<EditSlotRequest>,
) -> Result<Json<TimeSlot>, ApiError> {
    let slot = state
        .admin
        .lock()
        .await
        .stage_edit(&request.id, request.draft, request.policy)?;
    Ok(Json(slot))
}

async fn delete_slot<S: SlotStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<SlotIdRequest>,
) -> Result<Json<TimeSlot>, ApiError> {
    let slot = state.admin.lock().await.stage_delete(&request.id)?;
    Ok(Json(slot))
}

async fn toggle_slot<S: SlotStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<SlotIdRequest>,
) -> Result<Json<TimeSlot>, ApiError> {
    let slot = state.admin.lock().await.stage_toggle(&request.id)?;
    Ok(Json(slot))
}

async fn commit<S: SlotStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<Json<CalendarData>, ApiError> {
    let calendar = state.admin.lock().await.commit(&actor(&headers)).await?;
    Ok(Json(calendar))
}

async fn discard<S: SlotStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<DiscardRequest>,
) -> Result<Json<CalendarData>, ApiError> {
    let calendar = state.admin.lock().await.discard(request.confirm).await?;
    Ok(Json(calendar))
}

async fn clean_past<S: SlotStore>(State(state): State<AppState<S>>) -> Json<CleanPastOutcome> {
    Json(state.admin.lock().await.clean_past())
}

async fn release_slot<S: SlotStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    Json(request): Json<SlotIdRequest>,
) -> Result<Json<CalendarData>, ApiError> {
    let calendar = state.booking.release(&request.id, &actor(&headers)).await?;
    Ok(Json(calendar))
}
