use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Queues an event without waiting. A full or closed channel drops the
    /// event with a warning; callers never fail because of it.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Domain events emitted by the checkout engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total: i64,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: String,
    },
    VoucherRedeemed {
        voucher_id: Uuid,
        order_id: Uuid,
        claim_id: Option<Uuid>,
    },
    StockReserved {
        product_id: Uuid,
        quantity: i32,
    },
    StockReleased {
        product_id: Uuid,
        quantity: i32,
    },
    TrendingRecomputed {
        product_ids: Vec<Uuid>,
    },
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderPlaced {
                order_id,
                user_id,
                total,
            } => info!(%order_id, %user_id, total, "order placed"),
            Event::OrderCancelled { order_id, reason } => {
                warn!(%order_id, %reason, "order cancelled")
            }
            Event::VoucherRedeemed {
                voucher_id,
                order_id,
                claim_id,
            } => info!(%voucher_id, %order_id, ?claim_id, "voucher redeemed"),
            Event::StockReserved {
                product_id,
                quantity,
            } => info!(%product_id, quantity, "stock reserved"),
            Event::StockReleased {
                product_id,
                quantity,
            } => info!(%product_id, quantity, "stock released"),
            Event::TrendingRecomputed { product_ids } => {
                info!(count = product_ids.len(), "trending set recomputed")
            }
        }
    }

    info!("Event processing loop stopped");
}
