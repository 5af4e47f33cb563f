pub mod booking;
pub mod listing;

pub use booking::{BookingRecord, BookingRequest};
pub use listing::ListingCapacity;

/// Identifier of a listing owned by the catalog service.
pub type ListingId = i64;

/// Identifier assigned to a booking when it commits.
pub type BookingId = i64;
