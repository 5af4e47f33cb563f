use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::{BookingId, ListingId};

/// Immutable record of a confirmed reservation.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking_id: BookingId,
    pub listing_id: ListingId,
    pub requester_name: String,
    pub rooms_requested: i32,
    pub created_at: DateTime<Utc>,
}

/// A caller's request to book rooms on one listing.
///
/// `rooms_requested` is kept wide so that negative or oversized quantities
/// reach validation instead of failing deserialization.
#[derive(Debug, Clone, Validate)]
pub struct BookingRequest {
    pub listing_id: ListingId,
    #[validate(length(min = 1, message = "person_name required"))]
    pub requester_name: String,
    #[validate(range(min = 1, max = 2147483647, message = "no_of_rooms should be a positive number"))]
    pub rooms_requested: i64,
    #[validate(length(min = 1, max = 128, message = "idempotency key should be 1 to 128 characters"))]
    pub idempotency_token: Option<String>,
}

impl BookingRequest {
    pub fn new(listing_id: ListingId, requester_name: impl Into<String>, rooms_requested: i64) -> Self {
        Self {
            listing_id,
            requester_name: requester_name.into(),
            rooms_requested,
            idempotency_token: None,
        }
    }

    pub fn with_idempotency_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }
}
