pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod products;
pub mod vouchers;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
