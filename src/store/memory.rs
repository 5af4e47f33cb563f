//! Process-local reservation store.
//!
//! Each listing owns a `tokio::sync::Mutex` ledger, so reservations on one
//! listing queue behind each other while other listings proceed untouched.
//! After every commit the remaining capacity is published to an atomic, which
//! is what `get_capacity` reads without ever taking the ledger lock.
//!
//! State lives only as long as the process. Use the Postgres store where the
//! ledger has to survive a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info};

use super::{
    check_ledger, LedgerReport, LedgerViolation, ReservationStore, ReserveOutcome, ReserveRequest,
    StoreError,
};
use crate::models::{BookingId, BookingRecord, ListingCapacity, ListingId};

struct ListingSlot {
    published_available: AtomicI32,
    ledger: Mutex<Ledger>,
}

struct Ledger {
    total_units: i32,
    available_units: i32,
    suspended_reason: Option<String>,
    updated_at: DateTime<Utc>,
    bookings: Vec<BookingRecord>,
    /// Idempotency key -> index into `bookings`.
    idempotency: HashMap<String, usize>,
}

impl Ledger {
    fn booked(&self) -> i64 {
        self.bookings.iter().map(|b| i64::from(b.rooms_requested)).sum()
    }

    fn snapshot(&self, listing_id: ListingId) -> ListingCapacity {
        ListingCapacity {
            listing_id,
            total_units: self.total_units,
            available_units: self.available_units,
            suspended: self.suspended_reason.is_some(),
            suspended_reason: self.suspended_reason.clone(),
            updated_at: self.updated_at,
        }
    }
}

pub struct InMemoryStore {
    listings: RwLock<HashMap<ListingId, Arc<ListingSlot>>>,
    booking_index: RwLock<HashMap<BookingId, ListingId>>,
    next_booking_id: AtomicI64,
    lock_timeout: Duration,
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            listings: RwLock::new(HashMap::new()),
            booking_index: RwLock::new(HashMap::new()),
            next_booking_id: AtomicI64::new(1),
            lock_timeout,
        }
    }

    fn slot(&self, listing_id: ListingId) -> Result<Option<Arc<ListingSlot>>, StoreError> {
        let listings = self
            .listings
            .read()
            .map_err(|_| StoreError::Internal("listing map poisoned".into()))?;
        Ok(listings.get(&listing_id).cloned())
    }

    fn all_slots(&self) -> Result<Vec<(ListingId, Arc<ListingSlot>)>, StoreError> {
        let listings = self
            .listings
            .read()
            .map_err(|_| StoreError::Internal("listing map poisoned".into()))?;
        let mut slots: Vec<_> = listings.iter().map(|(id, slot)| (*id, slot.clone())).collect();
        slots.sort_by_key(|(id, _)| *id);
        Ok(slots)
    }

    async fn lock_ledger<'a>(
        &self,
        listing_id: ListingId,
        slot: &'a ListingSlot,
    ) -> Result<MutexGuard<'a, Ledger>, StoreError> {
        tokio::time::timeout(self.lock_timeout, slot.ledger.lock())
            .await
            .map_err(|_| {
                StoreError::LockTimeout(format!(
                    "listing {listing_id} after {}ms",
                    self.lock_timeout.as_millis()
                ))
            })
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn register_listing(
        &self,
        listing_id: ListingId,
        units: i32,
    ) -> Result<ListingCapacity, StoreError> {
        if units < 0 {
            return Err(StoreError::InvalidCapacity(units));
        }
        let slot = {
            let mut listings = self
                .listings
                .write()
                .map_err(|_| StoreError::Internal("listing map poisoned".into()))?;
            listings
                .entry(listing_id)
                .or_insert_with(|| {
                    info!(listing_id, units, "registered listing capacity");
                    Arc::new(ListingSlot {
                        published_available: AtomicI32::new(units),
                        ledger: Mutex::new(Ledger {
                            total_units: units,
                            available_units: units,
                            suspended_reason: None,
                            updated_at: Utc::now(),
                            bookings: Vec::new(),
                            idempotency: HashMap::new(),
                        }),
                    })
                })
                .clone()
        };
        let ledger = self.lock_ledger(listing_id, &slot).await?;
        Ok(ledger.snapshot(listing_id))
    }

    async fn get_capacity(&self, listing_id: ListingId) -> Result<Option<i32>, StoreError> {
        Ok(self
            .slot(listing_id)?
            .map(|slot| slot.published_available.load(Ordering::Acquire)))
    }

    async fn listing(&self, listing_id: ListingId) -> Result<Option<ListingCapacity>, StoreError> {
        let Some(slot) = self.slot(listing_id)? else {
            return Ok(None);
        };
        let ledger = self.lock_ledger(listing_id, &slot).await?;
        Ok(Some(ledger.snapshot(listing_id)))
    }

    async fn reserve(&self, request: &ReserveRequest) -> Result<ReserveOutcome, StoreError> {
        if let Some(reason) = request.rejection() {
            return Ok(ReserveOutcome::InvalidRequest(reason));
        }
        let listing_id = request.listing_id;
        let Some(slot) = self.slot(listing_id)? else {
            return Ok(ReserveOutcome::NotFound);
        };

        let mut ledger = self.lock_ledger(listing_id, &slot).await?;

        if let Some(key) = &request.idempotency_key {
            if let Some(&index) = ledger.idempotency.get(key) {
                return Ok(ReserveOutcome::Replayed(ledger.bookings[index].clone()));
            }
        }

        if let Some(reason) = &ledger.suspended_reason {
            return Err(StoreError::ListingSuspended {
                listing_id,
                reason: reason.clone(),
            });
        }

        // Only reachable if state was corrupted outside the reserve path.
        if ledger.available_units < 0 {
            let reason = format!("available_units is negative ({})", ledger.available_units);
            error!(listing_id, %reason, "suspending listing");
            ledger.suspended_reason = Some(reason.clone());
            return Err(StoreError::InvariantViolation { listing_id, reason });
        }

        if ledger.available_units < request.rooms_requested {
            return Ok(ReserveOutcome::InsufficientCapacity {
                available: ledger.available_units,
            });
        }

        let now = Utc::now();
        let booking = BookingRecord {
            booking_id: self.next_booking_id.fetch_add(1, Ordering::Relaxed),
            listing_id,
            requester_name: request.requester_name.clone(),
            rooms_requested: request.rooms_requested,
            created_at: now,
        };

        // Nothing below can fail, so both effects land together.
        ledger.available_units -= request.rooms_requested;
        ledger.updated_at = now;
        ledger.bookings.push(booking.clone());
        if let Some(key) = &request.idempotency_key {
            let index = ledger.bookings.len() - 1;
            ledger.idempotency.insert(key.clone(), index);
        }
        slot.published_available
            .store(ledger.available_units, Ordering::Release);
        drop(ledger);

        // Shared by all listings, so only touched once the ledger is released.
        match self.booking_index.write() {
            Ok(mut index) => {
                index.insert(booking.booking_id, listing_id);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(booking.booking_id, listing_id);
            }
        }

        Ok(ReserveOutcome::Reserved(booking))
    }

    async fn find_booking(&self, booking_id: BookingId) -> Result<Option<BookingRecord>, StoreError> {
        let listing_id = {
            let index = self
                .booking_index
                .read()
                .map_err(|_| StoreError::Internal("booking index poisoned".into()))?;
            match index.get(&booking_id) {
                Some(listing_id) => *listing_id,
                None => return Ok(None),
            }
        };
        let Some(slot) = self.slot(listing_id)? else {
            return Ok(None);
        };
        let ledger = self.lock_ledger(listing_id, &slot).await?;
        Ok(ledger
            .bookings
            .iter()
            .find(|b| b.booking_id == booking_id)
            .cloned())
    }

    async fn bookings_for_listing(
        &self,
        listing_id: ListingId,
    ) -> Result<Option<Vec<BookingRecord>>, StoreError> {
        let Some(slot) = self.slot(listing_id)? else {
            return Ok(None);
        };
        let ledger = self.lock_ledger(listing_id, &slot).await?;
        Ok(Some(ledger.bookings.clone()))
    }

    async fn verify_ledger(&self) -> Result<LedgerReport, StoreError> {
        let mut report = LedgerReport::default();
        for (listing_id, slot) in self.all_slots()? {
            let mut ledger = self.lock_ledger(listing_id, &slot).await?;
            if ledger.suspended_reason.is_some() {
                continue;
            }
            report.listings_checked += 1;
            let booked = ledger.booked();
            if let Some(reason) = check_ledger(ledger.total_units, ledger.available_units, booked) {
                error!(listing_id, %reason, "ledger invariant violated, suspending listing");
                ledger.suspended_reason = Some(reason.clone());
                ledger.updated_at = Utc::now();
                report.violations.push(LedgerViolation { listing_id, reason });
            }
        }
        Ok(report)
    }

    async fn reconcile(&self, listing_id: ListingId) -> Result<Option<ListingCapacity>, StoreError> {
        let Some(slot) = self.slot(listing_id)? else {
            return Ok(None);
        };
        let mut ledger = self.lock_ledger(listing_id, &slot).await?;
        let booked = ledger.booked();
        let expected = i64::from(ledger.total_units) - booked;
        ledger.updated_at = Utc::now();
        if expected >= 0 {
            // total_units is an i32 and booked is non-negative, so this fits.
            ledger.available_units = expected as i32;
            ledger.suspended_reason = None;
            slot.published_available
                .store(ledger.available_units, Ordering::Release);
            info!(listing_id, available = ledger.available_units, "listing reconciled");
        } else {
            let reason = format!(
                "booked {booked} exceeds total {}, manual correction required",
                ledger.total_units
            );
            error!(listing_id, %reason, "listing cannot be reconciled");
            ledger.suspended_reason = Some(reason);
        }
        Ok(Some(ledger.snapshot(listing_id)))
    }
}
