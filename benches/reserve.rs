use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

use room_reservations::{
    models::BookingRequest,
    services::coordinator::{ReservationCoordinator, RetryPolicy},
    store::{idempotency_key, InMemoryStore, ReservationStore, ReserveRequest},
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn store_with(rt: &tokio::runtime::Runtime, listings: i64, units: i32) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::default());
    rt.block_on(async {
        for listing_id in 0..listings {
            store.register_listing(listing_id, units).await.unwrap();
        }
    });
    store
}

fn bench_reserve(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("reserve");

    let store = store_with(&rt, 1, i32::MAX);
    group.bench_function("uncontended", |b| {
        b.to_async(&rt).iter(|| async {
            store
                .reserve(&ReserveRequest {
                    listing_id: 0,
                    requester_name: "bench".to_string(),
                    rooms_requested: 1,
                    idempotency_key: None,
                })
                .await
                .unwrap()
        })
    });

    let store = store_with(&rt, 1, 1);
    let key = idempotency_key(0, "bench", 1, "replay");
    rt.block_on(store.reserve(&ReserveRequest {
        listing_id: 0,
        requester_name: "bench".to_string(),
        rooms_requested: 1,
        idempotency_key: Some(key.clone()),
    }))
    .unwrap();
    group.bench_function("idempotent_replay", |b| {
        b.to_async(&rt).iter(|| async {
            store
                .reserve(&ReserveRequest {
                    listing_id: 0,
                    requester_name: "bench".to_string(),
                    rooms_requested: 1,
                    idempotency_key: Some(key.clone()),
                })
                .await
                .unwrap()
        })
    });

    // 32 tasks on one listing vs spread across 32 listings.
    for (name, listings) in [("contended_single_listing", 1i64), ("spread_32_listings", 32)] {
        let store = store_with(&rt, listings, i32::MAX);
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| {
                let store = store.clone();
                async move {
                    let handles: Vec<_> = (0..32i64)
                        .map(|i| {
                            let store = store.clone();
                            tokio::spawn(async move {
                                store
                                    .reserve(&ReserveRequest {
                                        listing_id: i % listings,
                                        requester_name: format!("guest-{i}"),
                                        rooms_requested: 1,
                                        idempotency_key: None,
                                    })
                                    .await
                                    .unwrap()
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap();
                    }
                }
            })
        });
    }

    group.finish();
}

fn bench_coordinator(c: &mut Criterion) {
    let rt = runtime();
    let store = store_with(&rt, 1, i32::MAX);
    let coordinator = ReservationCoordinator::new(store, RetryPolicy::default());

    c.bench_function("coordinator_book", |b| {
        b.to_async(&rt).iter(|| async {
            coordinator
                .book(BookingRequest::new(0, "bench", 1))
                .await
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_reserve, bench_coordinator);
criterion_main!(benches);
