use axum::{
    extract::{rejection::PathRejection, Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::bookings::{path_rejection, BookingResponse};
use crate::error::ApiError;
use crate::models::ListingId;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/item/{id}/availability", get(get_availability))
        .route("/item/{id}/bookings", get(list_bookings))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub item_id: ListingId,
    pub available_units: i32,
}

// GET /api/item/{id}/availability
// Served through the capacity cache, so it may trail the ledger by the TTL.
async fn get_availability(
    State(state): State<Arc<AppState>>,
    path: Result<Path<ListingId>, PathRejection>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let Path(item_id) = path.map_err(path_rejection)?;
    let available_units = state
        .cache
        .available(item_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(AvailabilityResponse {
        item_id,
        available_units,
    }))
}

// GET /api/item/{id}/bookings
async fn list_bookings(
    State(state): State<Arc<AppState>>,
    path: Result<Path<ListingId>, PathRejection>,
) -> Result<Json<Vec<BookingResponse>>, ApiError> {
    let Path(item_id) = path.map_err(path_rejection)?;
    let bookings = state
        .store
        .bookings_for_listing(item_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(
        bookings
            .into_iter()
            .map(|b| BookingResponse::new(b, None))
            .collect(),
    ))
}
