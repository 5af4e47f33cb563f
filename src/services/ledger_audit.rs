use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::store::{LedgerReport, ReservationStore, StoreError};

/// Periodic check of `available + booked == total` across all listings.
/// Violating listings are suspended by the store until reconciled.
pub struct LedgerAuditService {
    store: Arc<dyn ReservationStore>,
}

impl LedgerAuditService {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    pub async fn run_once(&self) -> Result<LedgerReport, StoreError> {
        let report = self.store.verify_ledger().await?;
        if report.violations.is_empty() {
            info!(listings = report.listings_checked, "ledger audit clean");
        } else {
            for violation in &report.violations {
                error!(
                    listing_id = violation.listing_id,
                    reason = %violation.reason,
                    "listing suspended by ledger audit"
                );
            }
            warn!(
                listings = report.listings_checked,
                suspended = report.violations.len(),
                "ledger audit found violations"
            );
        }
        Ok(report)
    }

    /// Runs the audit every `period`; the first run happens one period after
    /// spawning since startup verification is done separately.
    pub fn spawn(self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    // Transient store failures just wait for the next tick.
                    warn!(error = %e, "ledger audit failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, ReserveRequest};

    #[tokio::test]
    async fn clean_ledger_reports_every_listing() {
        let store = Arc::new(InMemoryStore::default());
        store.register_listing(1, 3).await.unwrap();
        store.register_listing(2, 0).await.unwrap();
        store
            .reserve(&ReserveRequest {
                listing_id: 1,
                requester_name: "Alice".into(),
                rooms_requested: 2,
                idempotency_key: None,
            })
            .await
            .unwrap();

        let report = LedgerAuditService::new(store).run_once().await.unwrap();
        assert_eq!(report.listings_checked, 2);
        assert!(report.violations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_audit_keeps_running() {
        let store = Arc::new(InMemoryStore::default());
        store.register_listing(1, 1).await.unwrap();

        let handle = LedgerAuditService::new(store).spawn(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(181)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
