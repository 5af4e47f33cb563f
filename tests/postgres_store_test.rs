//! Postgres store tests against a scratch database named by
//! `TEST_DATABASE_URL`. Ignored by default; run with
//! `cargo test --test postgres_store_test -- --ignored`.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use room_reservations::{
    config::DatabaseConfig,
    database::Database,
    models::ListingId,
    store::{idempotency_key, PgReservationStore, ReservationStore, ReserveOutcome, ReserveRequest},
};

async fn store() -> (Database, PgReservationStore) {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must point at a scratch Postgres database");
    let config = DatabaseConfig {
        url: Some(url.clone()),
        pool_size: 10,
        acquire_timeout_seconds: 5,
    };
    let db = Database::new(&url, &config).await.unwrap();
    db.run_migrations().await.unwrap();
    let store = PgReservationStore::new(db.pool.clone(), Duration::from_secs(2));
    (db, store)
}

/// Listing ids unique across test runs against the same database.
fn fresh_listing_id() -> ListingId {
    static COUNTER: AtomicI64 = AtomicI64::new(0);
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_micros() as i64;
    micros * 100 + COUNTER.fetch_add(1, Ordering::Relaxed) % 100
}

fn request(listing_id: ListingId, name: &str, rooms: i32) -> ReserveRequest {
    ReserveRequest {
        listing_id,
        requester_name: name.to_string(),
        rooms_requested: rooms,
        idempotency_key: None,
    }
}

#[tokio::test]
#[ignore = "needs TEST_DATABASE_URL"]
async fn reserve_decrements_and_records_together() {
    let (_db, store) = store().await;
    let listing = fresh_listing_id();
    store.register_listing(listing, 10).await.unwrap();

    assert!(matches!(
        store.reserve(&request(listing, "Alice", 3)).await.unwrap(),
        ReserveOutcome::Reserved(_)
    ));
    assert_eq!(
        store.reserve(&request(listing, "Bob", 8)).await.unwrap(),
        ReserveOutcome::InsufficientCapacity { available: 7 }
    );
    assert!(matches!(
        store.reserve(&request(listing, "Carl", 7)).await.unwrap(),
        ReserveOutcome::Reserved(_)
    ));
    assert_eq!(store.get_capacity(listing).await.unwrap(), Some(0));

    let bookings = store.bookings_for_listing(listing).await.unwrap().unwrap();
    let rooms: Vec<_> = bookings.iter().map(|b| b.rooms_requested).collect();
    assert_eq!(rooms, vec![3, 7]);

    assert_eq!(
        store.reserve(&request(fresh_listing_id(), "Dana", 1)).await.unwrap(),
        ReserveOutcome::NotFound
    );
}

#[tokio::test]
#[ignore = "needs TEST_DATABASE_URL"]
async fn idempotency_key_survives_sell_out() {
    let (_db, store) = store().await;
    let listing = fresh_listing_id();
    store.register_listing(listing, 1).await.unwrap();

    let mut req = request(listing, "Grace", 1);
    req.idempotency_key = Some(idempotency_key(listing, "Grace", 1, "pg-token"));

    let ReserveOutcome::Reserved(first) = store.reserve(&req).await.unwrap() else {
        panic!("first attempt should reserve");
    };
    assert_eq!(
        store.reserve(&req).await.unwrap(),
        ReserveOutcome::Replayed(first.clone())
    );
    assert_eq!(store.find_booking(first.booking_id).await.unwrap(), Some(first));
    assert_eq!(store.get_capacity(listing).await.unwrap(), Some(0));
}

#[tokio::test]
#[ignore = "needs TEST_DATABASE_URL"]
async fn row_lock_serializes_the_last_unit() {
    let (_db, store) = store().await;
    let store = Arc::new(store);

    for _ in 0..25 {
        let listing = fresh_listing_id();
        store.register_listing(listing, 1).await.unwrap();

        let handles: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|name| {
                let store = store.clone();
                tokio::spawn(async move { store.reserve(&request(listing, name, 1)).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), ReserveOutcome::Reserved(_)) {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.get_capacity(listing).await.unwrap(), Some(0));
    }
}

#[tokio::test]
#[ignore = "needs TEST_DATABASE_URL"]
async fn audit_suspends_drifted_listing_until_reconciled() {
    let (db, store) = store().await;
    let listing = fresh_listing_id();
    store.register_listing(listing, 5).await.unwrap();
    store.reserve(&request(listing, "Alice", 2)).await.unwrap();

    // Capacity drifts without a matching booking.
    sqlx::query("UPDATE listing_capacity SET available_units = available_units - 1 WHERE listing_id = $1")
        .bind(listing)
        .execute(&db.pool)
        .await
        .unwrap();

    let report = store.verify_ledger().await.unwrap();
    assert!(report.violations.iter().any(|v| v.listing_id == listing));
    assert!(store.listing(listing).await.unwrap().unwrap().suspended);
    assert!(store.reserve(&request(listing, "Bob", 1)).await.is_err());

    let repaired = store.reconcile(listing).await.unwrap().unwrap();
    assert!(!repaired.suspended);
    assert_eq!(repaired.available_units, 3);
    assert!(matches!(
        store.reserve(&request(listing, "Bob", 1)).await.unwrap(),
        ReserveOutcome::Reserved(_)
    ));
}
