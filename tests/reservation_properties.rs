use fake::{faker::name::en::Name, Fake};
use proptest::prelude::*;
use std::sync::Arc;

use room_reservations::{
    models::BookingRequest,
    services::coordinator::{BookingOutcome, ReservationCoordinator, RetryPolicy},
    store::{InMemoryStore, ReservationStore},
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever mix of requests arrives concurrently, capacity never goes
    /// negative and every confirmed booking matches exactly one decrement.
    #[test]
    fn capacity_and_bookings_stay_paired(
        capacity in 0i32..40,
        quantities in prop::collection::vec(-2i64..8, 1..48),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = Arc::new(InMemoryStore::default());
            store.register_listing(1, capacity).await.unwrap();
            let coordinator = Arc::new(ReservationCoordinator::new(store.clone(), RetryPolicy::default()));

            let handles: Vec<_> = quantities
                .iter()
                .map(|&rooms| {
                    let coordinator = coordinator.clone();
                    let name: String = Name().fake();
                    tokio::spawn(async move { coordinator.book(BookingRequest::new(1, name, rooms)).await })
                })
                .collect();

            let mut confirmed = 0i64;
            for (handle, &rooms) in handles.into_iter().zip(&quantities) {
                match handle.await.unwrap().unwrap() {
                    BookingOutcome::Confirmed { booking, replayed } => {
                        assert!(!replayed);
                        assert_eq!(i64::from(booking.rooms_requested), rooms);
                        confirmed += rooms;
                    }
                    BookingOutcome::NotEnoughRooms { available } => {
                        assert!(available >= 0);
                        assert!(i64::from(available) < rooms);
                    }
                    BookingOutcome::InvalidRequest(_) => assert!(rooms <= 0),
                    BookingOutcome::ListingNotFound => panic!("listing 1 exists"),
                }
            }

            let remaining = store.get_capacity(1).await.unwrap().unwrap();
            assert!(remaining >= 0);
            assert_eq!(i64::from(remaining) + confirmed, i64::from(capacity));

            let recorded: i64 = store
                .bookings_for_listing(1)
                .await
                .unwrap()
                .unwrap()
                .iter()
                .map(|b| i64::from(b.rooms_requested))
                .sum();
            assert_eq!(recorded, confirmed);
            assert!(store.verify_ledger().await.unwrap().violations.is_empty());
        });
    }

    /// Replaying a token any number of times books at most once.
    #[test]
    fn repeated_tokens_book_once(capacity in 1i32..10, rooms in 1i64..5, repeats in 1usize..6) {
        let rt = runtime();
        rt.block_on(async {
            let store = Arc::new(InMemoryStore::default());
            store.register_listing(7, capacity).await.unwrap();
            let coordinator = ReservationCoordinator::new(store.clone(), RetryPolicy::default());
            let name: String = Name().fake();

            let mut booking_ids = Vec::new();
            for _ in 0..repeats {
                let request = BookingRequest::new(7, name.clone(), rooms).with_idempotency_token("prop-token");
                if let BookingOutcome::Confirmed { booking, .. } = coordinator.book(request).await.unwrap() {
                    booking_ids.push(booking.booking_id);
                }
            }
            booking_ids.dedup();
            assert!(booking_ids.len() <= 1);

            let bookings = store.bookings_for_listing(7).await.unwrap().unwrap();
            assert_eq!(bookings.len(), booking_ids.len());
            let expected = if i64::from(capacity) >= rooms { i64::from(capacity) - rooms } else { i64::from(capacity) };
            assert_eq!(i64::from(store.get_capacity(7).await.unwrap().unwrap()), expected);
        });
    }
}
