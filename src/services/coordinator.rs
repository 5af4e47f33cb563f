//! Reservation coordinator.
//!
//! Validates a booking request, hands it to the store's atomic `reserve` and
//! maps the store's answer onto the outcome vocabulary callers see. It never
//! reads capacity itself, so there is no check-then-act window here: every
//! decision about capacity is made by the store under its per-listing guard.
//!
//! Only transient store failures are retried, and always by re-issuing the
//! whole atomic call under one idempotency key: the caller's token when given,
//! otherwise a token minted once per call. A commit whose acknowledgement was
//! lost is therefore replayed on retry, never booked twice.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::config::ReservationConfig;
use crate::error::InvalidParam;
use crate::models::{BookingRecord, BookingRequest, ListingId};
use crate::store::{idempotency_key, ReservationStore, ReserveOutcome, ReserveRequest, StoreError};

/// Closed set of business outcomes for a booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    /// `replayed` is set when an idempotency token matched an earlier commit.
    Confirmed { booking: BookingRecord, replayed: bool },
    ListingNotFound,
    /// Sold out and over-requested are reported alike; `available` is the
    /// count the store saw while holding the listing lock.
    NotEnoughRooms { available: i32 },
    InvalidRequest(Vec<InvalidParam>),
}

/// System faults, kept apart from the business outcomes above.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("reservation store unavailable after {attempts} attempt(s): {source}")]
    Unavailable { attempts: u32, source: StoreError },

    #[error("listing {listing_id} is suspended pending reconciliation: {reason}")]
    ListingSuspended { listing_id: ListingId, reason: String },

    #[error("reservation failed: {0}")]
    Internal(#[source] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ReservationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

pub struct ReservationCoordinator {
    store: Arc<dyn ReservationStore>,
    retry: RetryPolicy,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn ReservationStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    #[instrument(
        name = "book",
        skip(self, request),
        fields(listing_id = request.listing_id, rooms = request.rooms_requested)
    )]
    pub async fn book(&self, request: BookingRequest) -> Result<BookingOutcome, ReservationError> {
        if let Err(errors) = request.validate() {
            let params = invalid_params(&errors);
            debug!(?params, "booking request rejected");
            return Ok(BookingOutcome::InvalidRequest(params));
        }
        let Ok(rooms) = i32::try_from(request.rooms_requested) else {
            return Ok(BookingOutcome::InvalidRequest(vec![InvalidParam::new(
                "no_of_rooms",
                "no_of_rooms is too large",
            )]));
        };

        // Minted tokens only dedupe this call's own retries.
        let (token, minted) = match request.idempotency_token.as_deref() {
            Some(token) => (token.to_string(), false),
            None => (format!("auto-{}", Uuid::new_v4()), true),
        };
        let key = idempotency_key(request.listing_id, &request.requester_name, rooms, &token);
        let reserve = ReserveRequest {
            listing_id: request.listing_id,
            requester_name: request.requester_name,
            rooms_requested: rooms,
            idempotency_key: Some(key),
        };

        let outcome = match self.reserve_with_retry(&reserve).await? {
            // The caller sent this request once; our retry is not their replay.
            ReserveOutcome::Replayed(booking) if minted => {
                debug!(booking_id = booking.booking_id, "retry matched commit with lost acknowledgement");
                ReserveOutcome::Reserved(booking)
            }
            outcome => outcome,
        };
        Ok(to_outcome(outcome))
    }

    async fn reserve_with_retry(
        &self,
        request: &ReserveRequest,
    ) -> Result<ReserveOutcome, ReservationError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.reserve(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(attempt, ?delay, error = %err, "transient store failure, retrying reservation");
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    error!(attempt, error = %err, "reservation retries exhausted");
                    return Err(ReservationError::Unavailable {
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(StoreError::ListingSuspended { listing_id, reason })
                | Err(StoreError::InvariantViolation { listing_id, reason }) => {
                    error!(listing_id, %reason, "refusing reservation on suspended listing");
                    return Err(ReservationError::ListingSuspended { listing_id, reason });
                }
                Err(err) => {
                    error!(error = %err, "reservation failed");
                    return Err(ReservationError::Internal(err));
                }
            }
        }
    }
}

fn to_outcome(outcome: ReserveOutcome) -> BookingOutcome {
    match outcome {
        ReserveOutcome::Reserved(booking) => {
            info!(
                booking_id = booking.booking_id,
                rooms = booking.rooms_requested,
                "booking confirmed"
            );
            BookingOutcome::Confirmed {
                booking,
                replayed: false,
            }
        }
        ReserveOutcome::Replayed(booking) => {
            info!(booking_id = booking.booking_id, "idempotent retry matched existing booking");
            BookingOutcome::Confirmed {
                booking,
                replayed: true,
            }
        }
        ReserveOutcome::InsufficientCapacity { available } => {
            info!(available, "not enough rooms");
            BookingOutcome::NotEnoughRooms { available }
        }
        ReserveOutcome::NotFound => {
            debug!("listing not found");
            BookingOutcome::ListingNotFound
        }
        ReserveOutcome::InvalidRequest(reason) => {
            debug!(reason, "store rejected booking request");
            BookingOutcome::InvalidRequest(vec![InvalidParam::new("request", reason)])
        }
    }
}

/// Validation errors keyed by the field names used on the wire.
fn invalid_params(errors: &ValidationErrors) -> Vec<InvalidParam> {
    let mut params: Vec<InvalidParam> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, field_errors)| {
            let name = wire_name(&field);
            field_errors.iter().map(move |e| {
                let reason = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                InvalidParam::new(name, reason)
            })
        })
        .collect();
    params.sort_by(|a, b| a.name.cmp(&b.name));
    params
}

fn wire_name(field: &str) -> &'static str {
    match field {
        "listing_id" => "item_id",
        "requester_name" => "person_name",
        "rooms_requested" => "no_of_rooms",
        "idempotency_token" => "Idempotency-Key",
        _ => "request",
    }
}
