//! Postgres-backed reservation store.
//!
//! `reserve` runs as one transaction holding a row lock on the listing's
//! capacity row (`SELECT ... FOR UPDATE`). Postgres commits the decrement and
//! the booking insert together or not at all, which also covers a crash between
//! the two statements: an uncommitted transaction is discarded on recovery.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info};

use super::{
    check_ledger, LedgerReport, LedgerViolation, ReservationStore, ReserveOutcome, ReserveRequest,
    StoreError,
};
use crate::models::{BookingId, BookingRecord, ListingCapacity, ListingId};

const BOOKING_COLUMNS: &str =
    "booking_id, listing_id, requester_name, rooms_requested, created_at";

const LISTING_COLUMNS: &str =
    "listing_id, total_units, available_units, suspended, suspended_reason, updated_at";

#[derive(Clone)]
pub struct PgReservationStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgReservationStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    async fn begin_locked(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // Bounds the wait on the row lock; 55P03 surfaces as LockTimeout.
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn suspend(
        tx: &mut Transaction<'static, Postgres>,
        listing_id: ListingId,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE listing_capacity
             SET suspended = TRUE, suspended_reason = $2, updated_at = NOW()
             WHERE listing_id = $1",
        )
        .bind(listing_id)
        .bind(reason)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("55P03") => StoreError::LockTimeout(db.message().to_string()),
                // serialization_failure, deadlock_detected, admin_shutdown,
                // cannot_connect_now
                Some("40001" | "40P01" | "57P01" | "57P03") => {
                    StoreError::Unavailable(err.to_string())
                }
                _ => StoreError::Database(err.to_string()),
            },
            _ => StoreError::Database(err.to_string()),
        }
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn register_listing(
        &self,
        listing_id: ListingId,
        units: i32,
    ) -> Result<ListingCapacity, StoreError> {
        if units < 0 {
            return Err(StoreError::InvalidCapacity(units));
        }
        let inserted = sqlx::query(
            "INSERT INTO listing_capacity (listing_id, total_units, available_units)
             VALUES ($1, $2, $2)
             ON CONFLICT (listing_id) DO NOTHING",
        )
        .bind(listing_id)
        .bind(units)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() > 0 {
            info!(listing_id, units, "registered listing capacity");
        }

        self.listing(listing_id)
            .await?
            .ok_or_else(|| StoreError::Internal(format!("listing {listing_id} vanished after insert")))
    }

    async fn get_capacity(&self, listing_id: ListingId) -> Result<Option<i32>, StoreError> {
        // Plain MVCC read: never waits on a FOR UPDATE lock held by reserve.
        let available = sqlx::query_scalar::<_, i32>(
            "SELECT available_units FROM listing_capacity WHERE listing_id = $1",
        )
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(available)
    }

    async fn listing(&self, listing_id: ListingId) -> Result<Option<ListingCapacity>, StoreError> {
        let listing = sqlx::query_as::<_, ListingCapacity>(&format!(
            "SELECT {LISTING_COLUMNS} FROM listing_capacity WHERE listing_id = $1"
        ))
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(listing)
    }

    async fn reserve(&self, request: &ReserveRequest) -> Result<ReserveOutcome, StoreError> {
        if let Some(reason) = request.rejection() {
            return Ok(ReserveOutcome::InvalidRequest(reason));
        }
        let listing_id = request.listing_id;
        let mut tx = self.begin_locked().await?;

        let row = sqlx::query_as::<_, (i32, Option<String>)>(
            "SELECT available_units, CASE WHEN suspended THEN COALESCE(suspended_reason, 'suspended') END
             FROM listing_capacity
             WHERE listing_id = $1
             FOR UPDATE",
        )
        .bind(listing_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((available, suspended_reason)) = row else {
            tx.rollback().await?;
            return Ok(ReserveOutcome::NotFound);
        };

        // Looked up under the row lock: the key embeds the listing id, so a
        // concurrent retry of the same request waits here for the first one.
        if let Some(key) = &request.idempotency_key {
            let existing = sqlx::query_as::<_, BookingRecord>(&format!(
                "SELECT {BOOKING_COLUMNS} FROM bookings WHERE idempotency_key = $1"
            ))
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(booking) = existing {
                tx.rollback().await?;
                return Ok(ReserveOutcome::Replayed(booking));
            }
        }

        if let Some(reason) = suspended_reason {
            tx.rollback().await?;
            return Err(StoreError::ListingSuspended { listing_id, reason });
        }

        if available < 0 {
            let reason = format!("available_units is negative ({available})");
            error!(listing_id, %reason, "suspending listing");
            Self::suspend(&mut tx, listing_id, &reason).await?;
            tx.commit().await?;
            return Err(StoreError::InvariantViolation { listing_id, reason });
        }

        if available < request.rooms_requested {
            tx.rollback().await?;
            return Ok(ReserveOutcome::InsufficientCapacity { available });
        }

        sqlx::query(
            "UPDATE listing_capacity
             SET available_units = available_units - $2, updated_at = NOW()
             WHERE listing_id = $1",
        )
        .bind(listing_id)
        .bind(request.rooms_requested)
        .execute(&mut *tx)
        .await?;

        let booking = sqlx::query_as::<_, BookingRecord>(&format!(
            "INSERT INTO bookings (listing_id, requester_name, rooms_requested, idempotency_key)
             VALUES ($1, $2, $3, $4)
             RETURNING {BOOKING_COLUMNS}"
        ))
        .bind(listing_id)
        .bind(&request.requester_name)
        .bind(request.rooms_requested)
        .bind(request.idempotency_key.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReserveOutcome::Reserved(booking))
    }

    async fn find_booking(&self, booking_id: BookingId) -> Result<Option<BookingRecord>, StoreError> {
        let booking = sqlx::query_as::<_, BookingRecord>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(booking)
    }

    async fn bookings_for_listing(
        &self,
        listing_id: ListingId,
    ) -> Result<Option<Vec<BookingRecord>>, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM listing_capacity WHERE listing_id = $1)",
        )
        .bind(listing_id)
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Ok(None);
        }

        let bookings = sqlx::query_as::<_, BookingRecord>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE listing_id = $1 ORDER BY booking_id"
        ))
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(bookings))
    }

    async fn verify_ledger(&self) -> Result<LedgerReport, StoreError> {
        // One statement, one snapshot: capacity and bookings are read as of the
        // same instant, and reserve commits both together.
        let rows = sqlx::query_as::<_, (i64, i32, i32, i64)>(
            r#"
            SELECT c.listing_id, c.total_units, c.available_units,
                   COALESCE(SUM(b.rooms_requested), 0)::BIGINT AS booked
            FROM listing_capacity c
            LEFT JOIN bookings b ON b.listing_id = c.listing_id
            WHERE NOT c.suspended
            GROUP BY c.listing_id
            ORDER BY c.listing_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut report = LedgerReport {
            listings_checked: rows.len(),
            violations: Vec::new(),
        };

        for (listing_id, total_units, available_units, booked) in rows {
            let Some(reason) = check_ledger(total_units, available_units, booked) else {
                continue;
            };
            error!(listing_id, %reason, "ledger invariant violated, suspending listing");
            sqlx::query(
                "UPDATE listing_capacity
                 SET suspended = TRUE, suspended_reason = $2, updated_at = NOW()
                 WHERE listing_id = $1 AND NOT suspended",
            )
            .bind(listing_id)
            .bind(&reason)
            .execute(&self.pool)
            .await?;
            report.violations.push(LedgerViolation { listing_id, reason });
        }

        Ok(report)
    }

    async fn reconcile(&self, listing_id: ListingId) -> Result<Option<ListingCapacity>, StoreError> {
        let mut tx = self.begin_locked().await?;

        let total_units = sqlx::query_scalar::<_, i32>(
            "SELECT total_units FROM listing_capacity WHERE listing_id = $1 FOR UPDATE",
        )
        .bind(listing_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(total_units) = total_units else {
            tx.rollback().await?;
            return Ok(None);
        };

        let booked = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(rooms_requested), 0)::BIGINT FROM bookings WHERE listing_id = $1",
        )
        .bind(listing_id)
        .fetch_one(&mut *tx)
        .await?;

        let expected = i64::from(total_units) - booked;
        let listing = if expected >= 0 {
            let listing = sqlx::query_as::<_, ListingCapacity>(&format!(
                "UPDATE listing_capacity
                 SET available_units = $2, suspended = FALSE, suspended_reason = NULL, updated_at = NOW()
                 WHERE listing_id = $1
                 RETURNING {LISTING_COLUMNS}"
            ))
            .bind(listing_id)
            // Bounded by total_units, which is an INTEGER column.
            .bind(expected as i32)
            .fetch_one(&mut *tx)
            .await?;
            info!(listing_id, available = listing.available_units, "listing reconciled");
            listing
        } else {
            let reason =
                format!("booked {booked} exceeds total {total_units}, manual correction required");
            error!(listing_id, %reason, "listing cannot be reconciled");
            sqlx::query_as::<_, ListingCapacity>(&format!(
                "UPDATE listing_capacity
                 SET suspended = TRUE, suspended_reason = $2, updated_at = NOW()
                 WHERE listing_id = $1
                 RETURNING {LISTING_COLUMNS}"
            ))
            .bind(listing_id)
            .bind(&reason)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(Some(listing))
    }
}
