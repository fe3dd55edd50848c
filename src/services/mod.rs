// Pricing
pub mod discounts;
pub mod vouchers;

// Inventory
pub mod stock_ledger;
pub mod trending;

// External payment provider
pub mod payments;

// Checkout orchestration
pub mod order_processor;

pub use discounts::DiscountCalculator;
pub use order_processor::{CheckoutRequest, CheckoutSettings, OrderProcessor, VoucherQuote};
pub use payments::{HttpPaymentGateway, PaymentGateway};
pub use stock_ledger::StockLedger;
pub use trending::TrendingRecalculator;
pub use vouchers::VoucherValidator;
