pub mod order_repository;
pub mod product_repository;
pub mod voucher_repository;

pub use order_repository::OrderRepository;
pub use product_repository::ProductRepository;
pub use voucher_repository::VoucherRepository;
