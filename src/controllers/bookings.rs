use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::ApiError;
use crate::middleware::IdempotencyKey;
use crate::models::{BookingId, BookingRecord, BookingRequest, ListingId};
use crate::services::coordinator::BookingOutcome;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking))
        .route("/bookings/{booking_id}", get(get_booking))
        .route("/item/{id}/book", post(book_item))
}

/* ---------- wire types ---------- */

// Missing fields fall through to validation so each one is reported by name.
#[derive(Debug, Deserialize)]
pub struct CreateBookingBody {
    pub item_id: Option<ListingId>,
    #[serde(default)]
    pub person_name: String,
    #[serde(default)]
    pub no_of_rooms: i64,
}

#[derive(Debug, Deserialize)]
pub struct BookItemBody {
    #[serde(default)]
    pub person_name: String,
    #[serde(default)]
    pub no_of_rooms: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BookingResponse {
    pub booking_id: BookingId,
    pub item_id: ListingId,
    pub person_name: String,
    pub no_of_rooms: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replayed: Option<bool>,
}

impl BookingResponse {
    pub fn new(record: BookingRecord, replayed: Option<bool>) -> Self {
        Self {
            booking_id: record.booking_id,
            item_id: record.listing_id,
            person_name: record.requester_name,
            no_of_rooms: record.rooms_requested,
            created_at: record.created_at,
            replayed,
        }
    }
}

/// Body for a request that was understood but could not be fulfilled.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: u16,
    pub message: String,
}

/* ---------- helpers ---------- */

pub(crate) fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request("body", rejection.body_text())
}

pub(crate) fn path_rejection(rejection: PathRejection) -> ApiError {
    ApiError::bad_request("id", rejection.body_text())
}

async fn respond(state: &AppState, request: BookingRequest) -> Result<Response, ApiError> {
    let listing_id = request.listing_id;
    match state.coordinator.book(request).await? {
        BookingOutcome::Confirmed { booking, replayed } => {
            let status = if replayed {
                StatusCode::OK
            } else {
                state.cache.invalidate(listing_id).await;
                StatusCode::CREATED
            };
            Ok((status, Json(BookingResponse::new(booking, Some(replayed)))).into_response())
        }
        BookingOutcome::NotEnoughRooms { .. } => Ok((
            StatusCode::OK,
            Json(StatusMessage {
                status: StatusCode::OK.as_u16(),
                message: "rooms not available".to_string(),
            }),
        )
            .into_response()),
        BookingOutcome::ListingNotFound => Err(ApiError::NotFound),
        BookingOutcome::InvalidRequest(params) => Err(ApiError::BadRequest(params)),
    }
}

/* ---------- handlers ---------- */

// POST /api/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    IdempotencyKey(token): IdempotencyKey,
    body: Result<Json<CreateBookingBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(json_rejection)?;
    let Some(item_id) = body.item_id else {
        return Err(ApiError::bad_request("item_id", "item_id required"));
    };

    let mut request = BookingRequest::new(item_id, body.person_name, body.no_of_rooms);
    request.idempotency_token = token;
    respond(&state, request).await
}

// POST /api/item/{id}/book
async fn book_item(
    State(state): State<Arc<AppState>>,
    path: Result<Path<ListingId>, PathRejection>,
    IdempotencyKey(token): IdempotencyKey,
    body: Result<Json<BookItemBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Path(item_id) = path.map_err(path_rejection)?;
    let Json(body) = body.map_err(json_rejection)?;

    let mut request = BookingRequest::new(item_id, body.person_name, body.no_of_rooms);
    request.idempotency_token = token;
    respond(&state, request).await
}

// GET /api/bookings/{booking_id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    path: Result<Path<BookingId>, PathRejection>,
) -> Result<Json<BookingResponse>, ApiError> {
    let Path(booking_id) = path.map_err(path_rejection)?;
    let booking = state
        .store
        .find_booking(booking_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(BookingResponse::new(booking, None)))
}
