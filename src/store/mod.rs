//! Reservation store: the only owner of capacity and booking state.
//!
//! Every backend exposes the same atomic `reserve` primitive. The read of
//! `available_units`, the comparison against the requested quantity, the
//! decrement and the booking insert happen under one per-listing guard, so two
//! reservations against the same listing are always serialized while
//! reservations against different listings never wait on each other.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{BookingId, BookingRecord, ListingCapacity, ListingId};

pub use memory::InMemoryStore;
pub use postgres::PgReservationStore;

/// Input to the atomic reserve operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub listing_id: ListingId,
    pub requester_name: String,
    pub rooms_requested: i32,
    /// Derived with [`idempotency_key`], never the raw client token.
    pub idempotency_key: Option<String>,
}

impl ReserveRequest {
    /// Reason the request can never succeed, checked before touching state.
    pub fn rejection(&self) -> Option<&'static str> {
        if self.rooms_requested <= 0 {
            Some("rooms_requested must be positive")
        } else if self.requester_name.is_empty() {
            Some("requester_name must not be empty")
        } else {
            None
        }
    }
}

/// Result of a reserve call that reached a definite decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Capacity was decremented and the record written in the same commit.
    Reserved(BookingRecord),
    /// The idempotency key already committed; nothing changed.
    Replayed(BookingRecord),
    /// Fewer units remain than were requested; nothing changed.
    InsufficientCapacity { available: i32 },
    NotFound,
    InvalidRequest(&'static str),
}

/// Listing found breaking the ledger invariant during an audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerViolation {
    pub listing_id: ListingId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerReport {
    pub listings_checked: usize,
    pub violations: Vec<LedgerViolation>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("lock acquisition timed out: {0}")]
    LockTimeout(String),

    #[error("listing {listing_id} is suspended: {reason}")]
    ListingSuspended { listing_id: ListingId, reason: String },

    #[error("ledger invariant violated for listing {listing_id}: {reason}")]
    InvariantViolation { listing_id: ListingId, reason: String },

    #[error("capacity must not be negative, got {0}")]
    InvalidCapacity(i32),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether a fresh attempt of the same atomic call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::LockTimeout(_))
    }
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Creates the capacity record for a listing if it does not exist yet.
    ///
    /// Called by the catalog when a listing is created. An existing record is
    /// returned unchanged.
    async fn register_listing(
        &self,
        listing_id: ListingId,
        units: i32,
    ) -> Result<ListingCapacity, StoreError>;

    /// Point read of the remaining capacity. Never waits on a reservation in
    /// progress, so the value may lag a concurrent commit.
    async fn get_capacity(&self, listing_id: ListingId) -> Result<Option<i32>, StoreError>;

    async fn listing(&self, listing_id: ListingId) -> Result<Option<ListingCapacity>, StoreError>;

    /// Atomically checks capacity, decrements it and records the booking.
    async fn reserve(&self, request: &ReserveRequest) -> Result<ReserveOutcome, StoreError>;

    async fn find_booking(&self, booking_id: BookingId) -> Result<Option<BookingRecord>, StoreError>;

    /// Bookings for a listing in commit order, `None` for an unknown listing.
    async fn bookings_for_listing(
        &self,
        listing_id: ListingId,
    ) -> Result<Option<Vec<BookingRecord>>, StoreError>;

    /// Checks every active listing's ledger and suspends the broken ones.
    async fn verify_ledger(&self) -> Result<LedgerReport, StoreError>;

    /// Recomputes available capacity from the booking ledger and lifts the
    /// suspension when the result is consistent.
    async fn reconcile(&self, listing_id: ListingId) -> Result<Option<ListingCapacity>, StoreError>;
}

/// Derives the persisted idempotency key for a client token.
///
/// The key covers the request arguments, so reusing a token with a different
/// listing, requester or quantity is treated as a new request.
pub fn idempotency_key(
    listing_id: ListingId,
    requester_name: &str,
    rooms_requested: i32,
    token: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(listing_id.to_be_bytes());
    hasher.update([0u8]);
    hasher.update(requester_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(rooms_requested.to_be_bytes());
    hasher.update([0u8]);
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Ledger invariant shared by every backend.
pub(crate) fn check_ledger(total_units: i32, available_units: i32, booked: i64) -> Option<String> {
    if available_units < 0 {
        return Some(format!("available_units is negative ({available_units})"));
    }
    if i64::from(available_units) + booked != i64::from(total_units) {
        return Some(format!(
            "available {available_units} + booked {booked} does not match total {total_units}"
        ));
    }
    None
}
