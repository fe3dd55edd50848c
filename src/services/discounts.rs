use crate::entities::voucher::DiscountType;
use crate::models::voucher::Voucher;

/// Computes the discount a voucher grants on a subtotal.
///
/// All amounts are integer minor units. Percentage discounts truncate toward
/// zero, so no fractional minor unit is ever produced. The result is always
/// within `0..=subtotal`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscountCalculator;

impl DiscountCalculator {
    pub fn compute(voucher: &Voucher, subtotal: i64) -> i64 {
        if subtotal <= 0 {
            return 0;
        }

        let discount = match voucher.discount_type {
            DiscountType::Percentage => {
                let rate = i128::from(voucher.discount_value.clamp(0, 100));
                let raw = i128::from(subtotal) * rate / 100;
                match voucher.max_discount {
                    Some(cap) => raw.min(i128::from(cap.max(0))),
                    None => raw,
                }
            }
            DiscountType::Fixed => i128::from(voucher.discount_value.max(0)),
        };

        // Bounded by subtotal, which fits in i64.
        discount.clamp(0, i128::from(subtotal)) as i64
    }
}
