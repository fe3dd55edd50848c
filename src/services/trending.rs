use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::product_repository::ProductRepository;

/// Maintains the `is_trending` flag on the best-selling products.
///
/// The flag is a denormalized view of `purchase_count`; a failed or skipped
/// recompute only leaves it stale.
#[derive(Debug, Clone)]
pub struct TrendingRecalculator {
    products: ProductRepository,
    top_n: u64,
    events: EventSender,
}

impl TrendingRecalculator {
    pub fn new(products: ProductRepository, top_n: u64, events: EventSender) -> Self {
        Self {
            products,
            top_n,
            events,
        }
    }

    /// Recomputes the trending set and returns it, best seller first.
    #[instrument(skip(self), fields(top_n = self.top_n))]
    pub async fn recompute(&self) -> Result<Vec<Uuid>, ServiceError> {
        let top = self.products.top_sellers(self.top_n).await?;
        self.products.replace_trending(&top).await?;

        debug!(count = top.len(), "trending set updated");
        self.events.emit(Event::TrendingRecomputed {
            product_ids: top.clone(),
        });
        Ok(top)
    }

    /// Runs [`recompute`](Self::recompute) in the background, logging failures.
    pub fn spawn_recompute(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.recompute().await {
                warn!("trending recompute failed: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::services::stock_ledger::StockLedger;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn top_sellers_are_flagged_with_id_tie_break() {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();
        let products = ProductRepository::new(Arc::new(pool));
        let (tx, _rx) = mpsc::channel(64);
        let events = EventSender::new(tx);
        let ledger = StockLedger::new(products.clone(), events.clone());
        let trending = TrendingRecalculator::new(products.clone(), 2, events);

        let a = products.insert("A", "x", 10).await.unwrap();
        let b = products.insert("B", "x", 10).await.unwrap();
        let c = products.insert("C", "x", 10).await.unwrap();
        let never_sold = products.insert("D", "x", 10).await.unwrap();

        ledger.reserve(a.id, 5).await.unwrap();
        ledger.reserve(b.id, 2).await.unwrap();
        ledger.reserve(c.id, 2).await.unwrap();

        let top = trending.recompute().await.unwrap();
        let tied = std::cmp::min(b.id, c.id);
        assert_eq!(top, vec![a.id, tied]);

        // Shifting sales moves the flag and clears the previous holder.
        ledger.reserve(never_sold.id, 9).await.unwrap();
        let top = trending.recompute().await.unwrap();
        assert_eq!(top, vec![never_sold.id, a.id]);

        let flagged: Vec<Uuid> = products
            .trending()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(flagged, vec![never_sold.id, a.id]);
        assert!(!products.find(tied).await.unwrap().unwrap().is_trending);
    }

    #[tokio::test]
    async fn empty_catalogue_yields_empty_set() {
        let pool = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&pool).await.unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let trending = TrendingRecalculator::new(
            ProductRepository::new(Arc::new(pool)),
            10,
            EventSender::new(tx),
        );
        assert!(trending.recompute().await.unwrap().is_empty());
    }
}
