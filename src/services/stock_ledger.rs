use metrics::counter;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::{ServiceError, StockError};
use crate::events::{Event, EventSender};
use crate::repositories::product_repository::ProductRepository;

/// Atomic per-product stock reservation and its compensation.
#[derive(Debug, Clone)]
pub struct StockLedger {
    products: ProductRepository,
    events: EventSender,
}

/// A multi-line reservation that failed part way.
#[derive(Debug)]
pub struct ReservationFailure {
    /// The error that stopped the reservation.
    pub cause: ServiceError,
    /// Lines that were reserved and could not be released again.
    pub unreleased: Vec<(Uuid, i32)>,
}

impl StockLedger {
    pub fn new(products: ProductRepository, events: EventSender) -> Self {
        Self { products, events }
    }

    /// Takes `quantity` units of `product_id` out of stock, or fails without
    /// changing anything.
    #[instrument(skip(self))]
    pub async fn reserve(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be positive, got {quantity}"
            )));
        }

        if self.products.try_decrement(product_id, quantity).await? {
            self.events.emit(Event::StockReserved {
                product_id,
                quantity,
            });
            return Ok(());
        }

        let err = match self.products.find(product_id).await? {
            None => StockError::UnknownProduct { product_id },
            Some(product) => {
                counter!("checkout.stock.insufficient", 1);
                StockError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available: product.stock_quantity,
                }
            }
        };
        info!(%product_id, quantity, "reservation rejected: {}", err);
        Err(err.into())
    }

    /// Puts `quantity` units of `product_id` back.
    #[instrument(skip(self))]
    pub async fn release(&self, product_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        if !self.products.increment(product_id, quantity).await? {
            return Err(StockError::UnknownProduct { product_id }.into());
        }
        self.events.emit(Event::StockReleased {
            product_id,
            quantity,
        });
        Ok(())
    }

    /// Reserves every line or none of them.
    ///
    /// On the first failure the lines already reserved are released in
    /// reverse order. Any release that itself fails is reported in
    /// [`ReservationFailure::unreleased`].
    pub async fn reserve_all(&self, lines: &[(Uuid, i32)]) -> Result<(), ReservationFailure> {
        let mut reserved: Vec<(Uuid, i32)> = Vec::with_capacity(lines.len());

        for &(product_id, quantity) in lines {
            if let Err(cause) = self.reserve(product_id, quantity).await {
                warn!(
                    %product_id,
                    reserved = reserved.len(),
                    "reservation failed, releasing reserved lines"
                );
                let unreleased = self.release_all(&reserved).await;
                return Err(ReservationFailure { cause, unreleased });
            }
            reserved.push((product_id, quantity));
        }

        Ok(())
    }

    /// Releases every line, returning the ones that could not be released.
    pub async fn release_all(&self, lines: &[(Uuid, i32)]) -> Vec<(Uuid, i32)> {
        let mut unreleased = Vec::new();
        for &(product_id, quantity) in lines.iter().rev() {
            if let Err(e) = self.release(product_id, quantity).await {
                error!(%product_id, quantity, "failed to release stock: {}", e);
                unreleased.push((product_id, quantity));
            }
        }
        unreleased
    }
}
