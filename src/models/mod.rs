pub mod order;
pub mod product;
pub mod voucher;

pub use order::{CartLine, Order};
pub use product::ProductStock;
pub use voucher::{normalize_code, NewVoucher, Scope, Voucher, VoucherClaim};
