use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::errors::{ServiceError, VoucherError};
use crate::models::voucher::Voucher;
use crate::repositories::voucher_repository::VoucherRepository;

/// Decides whether a voucher code is usable against a cart right now.
///
/// Read-only: validating twice with unchanged state gives the same answer.
#[derive(Debug, Clone)]
pub struct VoucherValidator {
    repository: VoucherRepository,
}

impl VoucherValidator {
    pub fn new(repository: VoucherRepository) -> Self {
        Self { repository }
    }

    /// Looks the code up and runs every eligibility check, first failure wins.
    #[instrument(skip(self, cart_product_ids, cart_category_ids))]
    pub async fn validate(
        &self,
        code: &str,
        cart_product_ids: &[Uuid],
        cart_category_ids: &[String],
        subtotal: i64,
        now: DateTime<Utc>,
    ) -> Result<Voucher, ServiceError> {
        let voucher = self
            .repository
            .find_by_code(code)
            .await?
            .ok_or(VoucherError::NotFound)?;

        Self::check(&voucher, cart_product_ids, cart_category_ids, subtotal, now)?;
        debug!(voucher_id = %voucher.id, "voucher accepted");
        Ok(voucher)
    }

    /// Eligibility checks on an already loaded voucher, in order: active,
    /// validity window, usage limit, minimum purchase, product scope,
    /// category scope.
    pub fn check(
        voucher: &Voucher,
        cart_product_ids: &[Uuid],
        cart_category_ids: &[String],
        subtotal: i64,
        now: DateTime<Utc>,
    ) -> Result<(), VoucherError> {
        voucher.availability(now)?;

        if let Some(minimum) = voucher.min_purchase {
            if subtotal < minimum {
                return Err(VoucherError::BelowMinimum { minimum, subtotal });
            }
        }

        if !voucher.applicable_products.admits_any(cart_product_ids) {
            return Err(VoucherError::ProductNotEligible);
        }

        if !voucher.applicable_categories.admits_any(cart_category_ids) {
            return Err(VoucherError::CategoryNotEligible);
        }

        Ok(())
    }
}
