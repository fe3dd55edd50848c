use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::errors::{PaymentError, ServiceError, StockError, VoucherError};
use crate::events::{Event, EventSender};
use crate::models::order::{self, CartLine, Order};
use crate::models::voucher::Voucher;
use crate::repositories::{OrderRepository, ProductRepository, VoucherRepository};
use crate::services::discounts::DiscountCalculator;
use crate::services::payments::{ChargeRequest, PaymentGateway};
use crate::services::stock_ledger::StockLedger;
use crate::services::trending::TrendingRecalculator;
use crate::services::vouchers::VoucherValidator;

/// Progress of a single checkout, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CheckoutState {
    Draft,
    VoucherChecked,
    PaymentConfirmed,
    PaymentSkipped,
    OrderPersisted,
    StockReserved,
    VoucherConsumed,
    Completed,
    Aborted,
    PartiallyReserved,
}

/// Checkout tunables taken from configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub currency: String,
    pub shipping_fee: i64,
    pub free_shipping_threshold: Option<i64>,
    pub trending_top_n: u64,
    pub payment_timeout: Duration,
}

impl CheckoutSettings {
    /// Flat fee, waived once the subtotal reaches the free-shipping threshold.
    pub fn shipping_fee_for(&self, subtotal: i64) -> i64 {
        match self.free_shipping_threshold {
            Some(threshold) if subtotal >= threshold => 0,
            _ => self.shipping_fee,
        }
    }
}

impl From<&AppConfig> for CheckoutSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            currency: cfg.currency.clone(),
            shipping_fee: cfg.shipping_fee,
            free_shipping_threshold: cfg.free_shipping_threshold,
            trending_top_n: cfg.trending_top_n,
            payment_timeout: cfg.payment_timeout(),
        }
    }
}

/// A checkout submitted by an authenticated user.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
    pub voucher_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub country: String,
}

/// What a voucher would do to a cart, without redeeming it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoucherQuote {
    pub code: String,
    pub voucher_id: Uuid,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub shipping_fee: i64,
    pub total: i64,
}

#[derive(Debug)]
struct Pricing {
    subtotal: i64,
    shipping_fee: i64,
    discount_amount: i64,
    total: i64,
    voucher: Option<Voucher>,
}

/// Sequences validation, payment, persistence, stock reservation and voucher
/// accounting for one checkout, compensating when a step after persistence
/// fails.
#[derive(Clone)]
pub struct OrderProcessor {
    validator: VoucherValidator,
    vouchers: VoucherRepository,
    products: ProductRepository,
    orders: OrderRepository,
    ledger: StockLedger,
    trending: TrendingRecalculator,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
    settings: CheckoutSettings,
}

impl OrderProcessor {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        settings: CheckoutSettings,
    ) -> Self {
        let vouchers = VoucherRepository::new(db.clone());
        let products = ProductRepository::new(db.clone());
        Self {
            validator: VoucherValidator::new(vouchers.clone()),
            orders: OrderRepository::new(db),
            ledger: StockLedger::new(products.clone(), events.clone()),
            trending: TrendingRecalculator::new(
                products.clone(),
                settings.trending_top_n,
                events.clone(),
            ),
            vouchers,
            products,
            gateway,
            events,
            settings,
        }
    }

    pub fn vouchers(&self) -> &VoucherRepository {
        &self.vouchers
    }

    pub fn products(&self) -> &ProductRepository {
        &self.products
    }

    /// Places an order.
    ///
    /// Nothing is persisted unless the voucher is valid and any upfront
    /// payment is captured. From the charge onwards the steps run on their own
    /// task, so an abandoned request still ends in either a full commit or a
    /// full rollback, and a captured payment always ends as an order or a
    /// refund.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, lines = request.lines.len()))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Order, ServiceError> {
        let now = Utc::now();
        let mut state = CheckoutState::Draft;

        if request.country.trim().is_empty() {
            return Err(ServiceError::ValidationError("country is required".into()));
        }

        let pricing = self
            .price(&request.lines, request.voucher_code.as_deref(), now)
            .await
            .map_err(|e| abort(&mut state, e))?;
        if pricing.voucher.is_some() {
            transition(&mut state, CheckoutState::VoucherChecked);
        }

        let this = self.clone();
        let settle = async move { this.settle(request, pricing, now, state).await };
        tokio::spawn(settle.in_current_span())
            .await
            .map_err(|e| ServiceError::InternalError(format!("checkout task failed: {e}")))?
    }

    /// Captures payment, persists the order and commits it.
    async fn settle(
        &self,
        request: CheckoutRequest,
        pricing: Pricing,
        now: DateTime<Utc>,
        mut state: CheckoutState,
    ) -> Result<Order, ServiceError> {
        let (payment_status, payment_reference) =
            if request.payment_method.requires_upfront_capture() && pricing.total > 0 {
                let reference = self
                    .capture(request.user_id, request.lines.len(), pricing.total)
                    .await
                    .map_err(|e| abort(&mut state, e))?;
                transition(&mut state, CheckoutState::PaymentConfirmed);
                (PaymentStatus::Paid, Some(reference))
            } else {
                transition(&mut state, CheckoutState::PaymentSkipped);
                (PaymentStatus::Pending, None)
            };

        let order = Order {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            lines: request.lines,
            subtotal: pricing.subtotal,
            shipping_fee: pricing.shipping_fee,
            discount_amount: pricing.discount_amount,
            total: pricing.total,
            currency: self.settings.currency.clone(),
            voucher_id: pricing.voucher.as_ref().map(|v| v.id),
            status: OrderStatus::Pending,
            payment_status,
            payment_method: request.payment_method,
            payment_reference,
            country: request.country.trim().to_string(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.orders.insert(&order).await {
            if let Some(reference) = order.payment_reference.as_deref() {
                self.refund(reference, order.total).await;
            }
            return Err(abort(&mut state, e.into()));
        }
        transition(&mut state, CheckoutState::OrderPersisted);
        info!(order_id = %order.id, total = order.total, "order persisted");

        self.commit(order, state).await
    }

    /// Prices a cart with a voucher without redeeming anything.
    pub async fn quote_voucher(
        &self,
        code: &str,
        lines: &[CartLine],
    ) -> Result<VoucherQuote, ServiceError> {
        let pricing = self.price(lines, Some(code), Utc::now()).await?;
        let voucher = pricing.voucher.ok_or(VoucherError::NotFound)?;
        Ok(VoucherQuote {
            code: voucher.code,
            voucher_id: voucher.id,
            subtotal: pricing.subtotal,
            discount_amount: pricing.discount_amount,
            shipping_fee: pricing.shipping_fee,
            total: pricing.total,
        })
    }

    /// The user's order, if they own it.
    pub async fn find_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Order, ServiceError> {
        self.orders
            .find_for_user(order_id, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id}")))
    }

    async fn price(
        &self,
        lines: &[CartLine],
        voucher_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Pricing, ServiceError> {
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".into()));
        }
        for line in lines {
            line.validate()?;
        }
        let subtotal = order::subtotal(lines)
            .ok_or_else(|| ServiceError::ValidationError("cart subtotal overflows".into()))?;

        let (product_ids, category_ids) = self.catalogue(lines).await?;

        let voucher = match voucher_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(
                self.validator
                    .validate(code, &product_ids, &category_ids, subtotal, now)
                    .await?,
            ),
            None => None,
        };
        let discount_amount = voucher
            .as_ref()
            .map_or(0, |v| DiscountCalculator::compute(v, subtotal));

        let shipping_fee = self.settings.shipping_fee_for(subtotal);
        let total = subtotal
            .checked_add(shipping_fee)
            .and_then(|t| t.checked_sub(discount_amount))
            .ok_or_else(|| ServiceError::ValidationError("order total overflows".into()))?;
        if total < 0 {
            return Err(ServiceError::InternalError(format!(
                "negative total {total} for subtotal {subtotal}"
            )));
        }

        Ok(Pricing {
            subtotal,
            shipping_fee,
            discount_amount,
            total,
            voucher,
        })
    }

    /// Distinct product ids of the cart and the categories they belong to.
    /// Fails on the first product the catalogue does not know.
    async fn catalogue(&self, lines: &[CartLine]) -> Result<(Vec<Uuid>, Vec<String>), ServiceError> {
        let ids: Vec<Uuid> = lines
            .iter()
            .map(|l| l.product_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let products = self.products.find_many(&ids).await?;

        if let Some(&missing) = ids
            .iter()
            .find(|id| !products.iter().any(|p| p.id == **id))
        {
            return Err(StockError::UnknownProduct {
                product_id: missing,
            }
            .into());
        }

        let categories = products
            .into_iter()
            .map(|p| p.category_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok((ids, categories))
    }

    async fn capture(&self, user_id: Uuid, line_count: usize, total: i64) -> Result<String, ServiceError> {
        let request = ChargeRequest {
            amount: total,
            currency: self.settings.currency.clone(),
            description: format!("Storefront order, {line_count} line(s)"),
            customer: user_id,
        };

        let outcome =
            tokio::time::timeout(self.settings.payment_timeout, self.gateway.charge(request)).await;
        let result = match outcome {
            Err(_) => Err(PaymentError::Timeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok(receipt)) if !receipt.success => Err(PaymentError::Declined(
                receipt
                    .message
                    .unwrap_or_else(|| "payment was not approved".into()),
            )),
            Ok(Ok(receipt)) => receipt
                .reference
                .filter(|r| !r.trim().is_empty())
                .ok_or(PaymentError::Unconfirmed),
        };

        result.map_err(|e| {
            counter!("checkout.payments.failed", 1);
            warn!(%user_id, total, "payment failed: {}", e);
            e.into()
        })
    }

    async fn commit(&self, mut order: Order, mut state: CheckoutState) -> Result<Order, ServiceError> {
        let lines: Vec<(Uuid, i32)> = order
            .lines
            .iter()
            .map(|l| (l.product_id, l.quantity))
            .collect();

        if let Err(failure) = self.ledger.reserve_all(&lines).await {
            return Err(self
                .abandon(&mut order, &mut state, failure.cause, failure.unreleased)
                .await);
        }
        transition(&mut state, CheckoutState::StockReserved);

        if let Some(voucher_id) = order.voucher_id {
            match self.vouchers.consume(voucher_id, order.user_id, Utc::now()).await {
                Ok(claim_id) => {
                    counter!("checkout.vouchers.redeemed", 1);
                    self.events.emit(Event::VoucherRedeemed {
                        voucher_id,
                        order_id: order.id,
                        claim_id,
                    });
                    transition(&mut state, CheckoutState::VoucherConsumed);
                }
                Err(cause) => {
                    let unreleased = self.ledger.release_all(&lines).await;
                    return Err(self.abandon(&mut order, &mut state, cause, unreleased).await);
                }
            }
        }

        transition(&mut state, CheckoutState::Completed);
        counter!("checkout.orders.completed", 1);
        self.events.emit(Event::OrderPlaced {
            order_id: order.id,
            user_id: order.user_id,
            total: order.total,
        });
        self.trending.spawn_recompute();

        Ok(order)
    }

    /// Cancels a persisted order whose stock has been released, refunding a
    /// captured payment. Returns the error to report to the caller.
    async fn abandon(
        &self,
        order: &mut Order,
        state: &mut CheckoutState,
        cause: ServiceError,
        unreleased: Vec<(Uuid, i32)>,
    ) -> ServiceError {
        if !unreleased.is_empty() {
            transition(state, CheckoutState::PartiallyReserved);
            error!(
                order_id = %order.id,
                ?unreleased,
                "stock could not be released; order left pending for review"
            );
            return ServiceError::PartiallyReserved {
                order_id: order.id,
                reason: format!("{cause}; {} line(s) still reserved", unreleased.len()),
            };
        }

        warn!(order_id = %order.id, "cancelling order: {}", cause);
        let payment_status = match (order.payment_status, order.payment_reference.clone()) {
            (PaymentStatus::Paid, Some(reference)) => {
                if self.refund(&reference, order.total).await {
                    PaymentStatus::Refunded
                } else {
                    PaymentStatus::Paid
                }
            }
            (status, _) => status,
        };

        match self.orders.mark_cancelled(order.id, payment_status).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(order_id = %order.id, "order was no longer pending when cancelling");
            }
            Err(e) => {
                transition(state, CheckoutState::PartiallyReserved);
                error!(order_id = %order.id, "failed to mark order cancelled: {}", e);
                return ServiceError::PartiallyReserved {
                    order_id: order.id,
                    reason: format!("{cause}; order could not be cancelled"),
                };
            }
        }

        order.status = OrderStatus::Cancelled;
        order.payment_status = payment_status;
        transition(state, CheckoutState::Aborted);
        counter!("checkout.orders.cancelled", 1);
        self.events.emit(Event::OrderCancelled {
            order_id: order.id,
            reason: cause.code().to_string(),
        });

        cause
    }

    /// Best-effort refund. Returns whether the provider confirmed it.
    async fn refund(&self, reference: &str, amount: i64) -> bool {
        let outcome = tokio::time::timeout(
            self.settings.payment_timeout,
            self.gateway.refund(reference, amount),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                info!(reference, amount, "payment refunded");
                true
            }
            Ok(Err(e)) => {
                error!(reference, amount, "refund failed, needs reconciliation: {}", e);
                false
            }
            Err(_) => {
                error!(reference, amount, "refund timed out, needs reconciliation");
                false
            }
        }
    }
}

fn transition(state: &mut CheckoutState, next: CheckoutState) {
    info!(from = %state, to = %next, "checkout transition");
    *state = next;
}

fn abort(state: &mut CheckoutState, err: ServiceError) -> ServiceError {
    info!(from = %state, reason = err.code(), "checkout aborted");
    *state = CheckoutState::Aborted;
    err
}
