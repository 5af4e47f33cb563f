use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use super::ListingId;

/// Bookable capacity attached to a catalog listing.
///
/// `total_units` is the capacity the listing was registered with and never
/// changes on the booking path. `available_units` is decremented by each
/// confirmed booking, so `available_units + booked rooms == total_units` holds
/// for a healthy ledger.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ListingCapacity {
    pub listing_id: ListingId,
    pub total_units: i32,
    pub available_units: i32,
    pub suspended: bool,
    pub suspended_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}
