use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequestParts, MatchedPath, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use ulid::Ulid;

use crate::engine::{BookingFilter, Engine, EngineError};
use crate::model::*;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/admins", post(register_admin))
        .route("/schedule-slots", post(create_slot).get(list_slots))
        .route("/schedule-slots/:id", delete(delete_slot))
        .route("/deliveries", post(record_delivery))
        .route("/deliveries/:id/status", put(update_delivery_status))
        .route("/assignments", post(record_assignment))
        .route("/bookings/pickup", post(create_pickup_booking))
        .route("/bookings/delivery", post(create_delivery_booking))
        .route("/bookings", get(list_bookings))
        .route("/bookings/:id/status", put(update_booking_status))
        .route("/bookings/:id/fulfillment", get(fulfillment))
        .layer(middleware::from_fn(track_metrics))
        .with_state(AppState { engine })
}

async fn track_metrics(req: Request<axum::body::Body>, next: Next) -> Response {
    let op = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());
    let start = Instant::now();
    let response = next.run(req).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op.clone())
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(
        observability::REQUESTS_TOTAL,
        "op" => op,
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    response
}

// ── Errors ───────────────────────────────────────────────────────

/// Boundary error: status + stable code + human message, rendered as the
/// uniform envelope `{"error": {"code", "message"}}`.
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn unauthenticated(message: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthenticated",
            message: message.into(),
        }
    }

    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "validation",
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Validation(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            EngineError::Authorization(_) | EngineError::AssignmentMismatch { .. } => {
                StatusCode::FORBIDDEN
            }
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Assignment(_)
            | EngineError::Precondition(_)
            | EngineError::TemporalOrder { .. }
            | EngineError::CapacityExceeded(_)
            | EngineError::DuplicateBooking(_)
            | EngineError::InvalidState(_)
            | EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
            EngineError::Wal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("request failed: {} ({})", self.message, self.code);
        }
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

// ── Caller identity ──────────────────────────────────────────────

/// Caller identity as established by the upstream auth gateway, which
/// strips and re-sets `X-Actor-Id` on every request. Authentication is
/// the gateway's job; authorization happens in the engine.
pub struct Actor(pub Ulid);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-actor-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthenticated("missing X-Actor-Id header"))?;
        let id = Ulid::from_string(raw)
            .map_err(|_| ApiError::unauthenticated("invalid X-Actor-Id header"))?;
        Ok(Actor(id))
    }
}

// ── Field parsing ────────────────────────────────────────────────
// Ids, dates, and statuses arrive as strings and are parsed by hand so a
// malformed field is a 400 with a validation code, not a framework 422.

fn parse_id(raw: &str, what: &'static str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::bad_request(what))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("unparseable date, expected YYYY-MM-DD"))
}

fn parse_time(raw: &str) -> Result<NaiveTime, ApiError> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| ApiError::bad_request("unparseable time, expected HH:MM[:SS]"))
}

fn parse_slot_kind(raw: &str) -> Result<SlotKind, ApiError> {
    match raw {
        "delivery" => Ok(SlotKind::Delivery),
        "pickup" => Ok(SlotKind::Pickup),
        _ => Err(ApiError::bad_request("type must be 'delivery' or 'pickup'")),
    }
}

fn parse_booking_status(raw: &str) -> Result<BookingStatus, ApiError> {
    match raw {
        "pending" => Ok(BookingStatus::Pending),
        "confirmed" => Ok(BookingStatus::Confirmed),
        "in_progress" => Ok(BookingStatus::InProgress),
        "completed" => Ok(BookingStatus::Completed),
        "cancelled" => Ok(BookingStatus::Cancelled),
        _ => Err(ApiError::bad_request("invalid status value")),
    }
}

fn parse_delivery_status(raw: &str) -> Result<DeliveryStatus, ApiError> {
    match raw {
        "pending" => Ok(DeliveryStatus::Pending),
        "confirmed" => Ok(DeliveryStatus::Confirmed),
        "completed" => Ok(DeliveryStatus::Completed),
        "cancelled" => Ok(DeliveryStatus::Cancelled),
        _ => Err(ApiError::bad_request("invalid status value")),
    }
}

fn parse_admin_ref(id: Option<&str>, email: Option<&str>) -> Result<AdminRef, ApiError> {
    match (id, email) {
        (Some(raw), _) => Ok(AdminRef::Id(parse_id(raw, "invalid admin_id")?)),
        (None, Some(email)) => Ok(AdminRef::Email(email.to_string())),
        (None, None) => Err(ApiError::bad_request("admin_id or admin_email required")),
    }
}

// ── Handlers ─────────────────────────────────────────────────────

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Deserialize)]
struct RegisterAdminRequest {
    admin_id: String,
    email: String,
}

async fn register_admin(
    State(state): State<AppState>,
    Json(req): Json<RegisterAdminRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&req.admin_id, "invalid admin_id")?;
    let admin = state.engine.register_admin(id, req.email).await?;
    Ok((StatusCode::CREATED, Json(admin)))
}

#[derive(Deserialize)]
struct CreateSlotRequest {
    date: String,
    start_time: String,
    end_time: String,
    #[serde(rename = "type")]
    kind: String,
    location: String,
    max_slots: u32,
}

async fn create_slot(
    Actor(admin_id): Actor,
    State(state): State<AppState>,
    Json(req): Json<CreateSlotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = state
        .engine
        .publish_slot(
            admin_id,
            parse_date(&req.date)?,
            parse_time(&req.start_time)?,
            parse_time(&req.end_time)?,
            parse_slot_kind(&req.kind)?,
            req.location,
            req.max_slots,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

async fn delete_slot(
    Actor(admin_id): Actor,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let slot_id = parse_id(&id, "invalid slot id")?;
    state.engine.delete_slot(admin_id, slot_id).await?;
    Ok(Json(json!({ "status": "cancelled" })))
}

#[derive(Deserialize)]
struct SlotRangeQuery {
    admin_id: Option<String>,
    from: String,
    to: String,
}

async fn list_slots(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Query(q): Query<SlotRangeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let admin_id = match q.admin_id {
        Some(raw) => parse_id(&raw, "invalid admin_id")?,
        None => actor,
    };
    let slots = state
        .engine
        .list_slots(admin_id, parse_date(&q.from)?, parse_date(&q.to)?)
        .await?;
    Ok(Json(slots))
}

#[derive(Deserialize)]
struct RecordDeliveryRequest {
    product_id: String,
    seller_id: String,
    admin_id: Option<String>,
    admin_email: Option<String>,
}

async fn record_delivery(
    State(state): State<AppState>,
    Json(req): Json<RecordDeliveryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = parse_admin_ref(req.admin_id.as_deref(), req.admin_email.as_deref())?;
    let delivery = state
        .engine
        .record_delivery(
            parse_id(&req.product_id, "invalid product_id")?,
            parse_id(&req.seller_id, "invalid seller_id")?,
            admin,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(delivery)))
}

#[derive(Deserialize)]
struct UpdateDeliveryStatusRequest {
    status: String,
}

async fn update_delivery_status(
    Actor(admin_id): Actor,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDeliveryStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let delivery_id = parse_id(&id, "invalid delivery id")?;
    let status = parse_delivery_status(&req.status)?;
    let delivery = state
        .engine
        .transition_delivery_status(admin_id, delivery_id, status)
        .await?;
    Ok(Json(delivery))
}

#[derive(Deserialize)]
struct RecordAssignmentRequest {
    order_id: String,
    product_id: String,
    buyer_id: String,
    admin_id: Option<String>,
    admin_email: Option<String>,
}

async fn record_assignment(
    State(state): State<AppState>,
    Json(req): Json<RecordAssignmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = parse_admin_ref(req.admin_id.as_deref(), req.admin_email.as_deref())?;
    let assignment = state
        .engine
        .record_assignment(
            parse_id(&req.order_id, "invalid order_id")?,
            parse_id(&req.product_id, "invalid product_id")?,
            parse_id(&req.buyer_id, "invalid buyer_id")?,
            admin,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

#[derive(Deserialize)]
struct CreatePickupBookingRequest {
    product_id: String,
    admin_schedule_id: String,
    delivery_id: String,
    preferred_time: Option<String>,
    notes: Option<String>,
}

async fn create_pickup_booking(
    Actor(buyer_id): Actor,
    State(state): State<AppState>,
    Json(req): Json<CreatePickupBookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let preferred_time = match &req.preferred_time {
        Some(raw) => Some(parse_time(raw)?),
        None => None,
    };
    let result = state
        .engine
        .create_pickup_booking(
            buyer_id,
            parse_id(&req.product_id, "invalid product_id")?,
            parse_id(&req.admin_schedule_id, "invalid admin_schedule_id")?,
            parse_id(&req.delivery_id, "invalid delivery_id")?,
            preferred_time,
            req.notes,
        )
        .await;
    observe_booking_outcome(&result);
    Ok((StatusCode::CREATED, Json(result?)))
}

#[derive(Deserialize)]
struct CreateDeliveryBookingRequest {
    product_id: String,
    admin_schedule_id: String,
    preferred_time: Option<String>,
    notes: Option<String>,
}

async fn create_delivery_booking(
    Actor(seller_id): Actor,
    State(state): State<AppState>,
    Json(req): Json<CreateDeliveryBookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let preferred_time = match &req.preferred_time {
        Some(raw) => Some(parse_time(raw)?),
        None => None,
    };
    let result = state
        .engine
        .create_delivery_booking(
            seller_id,
            parse_id(&req.product_id, "invalid product_id")?,
            parse_id(&req.admin_schedule_id, "invalid admin_schedule_id")?,
            preferred_time,
            req.notes,
        )
        .await;
    observe_booking_outcome(&result);
    Ok((StatusCode::CREATED, Json(result?)))
}

fn observe_booking_outcome(result: &Result<Booking, EngineError>) {
    match result {
        Ok(_) => {
            metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        }
        Err(e) => {
            metrics::counter!(observability::BOOKINGS_REJECTED_TOTAL, "reason" => e.code())
                .increment(1);
        }
    }
}

#[derive(Deserialize)]
struct BookingListQuery {
    buyer_id: Option<String>,
    admin_id: Option<String>,
    status: Option<String>,
    slot_id: Option<String>,
    delivery_id: Option<String>,
}

async fn list_bookings(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Query(q): Query<BookingListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let mut filter = BookingFilter {
        buyer_id: match q.buyer_id {
            Some(raw) => Some(parse_id(&raw, "invalid buyer_id")?),
            None => None,
        },
        admin_id: match q.admin_id {
            Some(raw) => Some(parse_id(&raw, "invalid admin_id")?),
            None => None,
        },
        status: match q.status {
            Some(raw) => Some(parse_booking_status(&raw)?),
            None => None,
        },
        slot_id: match q.slot_id {
            Some(raw) => Some(parse_id(&raw, "invalid slot_id")?),
            None => None,
        },
        delivery_id: match q.delivery_id {
            Some(raw) => Some(parse_id(&raw, "invalid delivery_id")?),
            None => None,
        },
    };

    // Staff see everything; anyone else is pinned to their own bookings
    // regardless of the filter they asked for.
    if state.engine.admin_profile(&actor).is_none() {
        filter.buyer_id = Some(actor);
    }

    let bookings = state.engine.list_bookings(&filter).await;
    Ok(Json(bookings))
}

#[derive(Deserialize)]
struct UpdateBookingStatusRequest {
    status: String,
    admin_notes: Option<String>,
}

async fn update_booking_status(
    Actor(admin_id): Actor,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateBookingStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let booking_id = parse_id(&id, "invalid booking id")?;
    let status = parse_booking_status(&req.status)?;
    let booking = state
        .engine
        .transition_booking_status(admin_id, booking_id, status, req.admin_notes)
        .await?;
    metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "status" => status.as_str())
        .increment(1);
    Ok(Json(booking))
}

async fn fulfillment(
    Actor(actor): Actor,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let booking_id = parse_id(&id, "invalid booking id")?;
    let view = state.engine.fulfillment_view(&booking_id).await?;
    // Same visibility rule as listings: staff or one of the booking's own
    // parties, nobody else. Report NotFound either way.
    let is_staff = state.engine.admin_profile(&actor).is_some();
    let is_party = view.booking.buyer_id == actor || view.booking.seller_id == actor;
    if !is_staff && !is_party {
        return Err(EngineError::NotFound(booking_id).into());
    }
    Ok(Json(view))
}
