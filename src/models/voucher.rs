use crate::entities::voucher::{self, DiscountType};
use crate::errors::{ServiceError, VoucherError};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Trims and upper-cases a voucher code so lookups are case-insensitive.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Which products or categories a voucher applies to.
///
/// Serialized as the string `"all"` or as an array of ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope<T> {
    All,
    Subset(BTreeSet<T>),
}

impl<T: Ord> Scope<T> {
    pub fn subset<I: IntoIterator<Item = T>>(ids: I) -> Self {
        Scope::Subset(ids.into_iter().collect())
    }

    /// True when the scope is `All` or at least one of `ids` is in the subset.
    pub fn admits_any<'a, I>(&self, ids: I) -> bool
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        match self {
            Scope::All => true,
            Scope::Subset(allowed) => ids.into_iter().any(|id| allowed.contains(id)),
        }
    }

    fn is_empty_subset(&self) -> bool {
        matches!(self, Scope::Subset(ids) if ids.is_empty())
    }
}

impl<T: Ord + Serialize> Serialize for Scope<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scope::All => serializer.serialize_str("all"),
            Scope::Subset(ids) => ids.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged, bound(deserialize = "T: Deserialize<'de> + Ord"))]
enum ScopeRepr<T> {
    Keyword(String),
    Ids(BTreeSet<T>),
}

impl<'de, T: Deserialize<'de> + Ord> Deserialize<'de> for Scope<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ScopeRepr::deserialize(deserializer)? {
            ScopeRepr::Keyword(word) if word.eq_ignore_ascii_case("all") => Ok(Scope::All),
            ScopeRepr::Keyword(word) => Err(D::Error::custom(format!(
                "unknown scope keyword `{word}`, expected \"all\" or a list of ids"
            ))),
            ScopeRepr::Ids(ids) => Ok(Scope::Subset(ids)),
        }
    }
}

/// A discount code with its eligibility rules and usage accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Voucher {
    pub id: Uuid,
    pub code: String,
    pub description: String,
    pub discount_type: DiscountType,
    /// Whole percent for `Percentage`, minor units for `Fixed`.
    pub discount_value: i64,
    pub max_discount: Option<i64>,
    pub min_purchase: Option<i64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub applicable_products: Scope<Uuid>,
    pub applicable_categories: Scope<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Voucher {
    /// Whether the voucher can be redeemed at `now` at all, independent of any cart.
    ///
    /// The validity window is half-open: usable from `start_date` up to but
    /// excluding `end_date`.
    pub fn availability(&self, now: DateTime<Utc>) -> Result<(), VoucherError> {
        if !self.is_active {
            return Err(VoucherError::Deactivated);
        }
        if now < self.start_date {
            return Err(VoucherError::NotYetValid {
                starts_at: self.start_date,
            });
        }
        if now >= self.end_date {
            return Err(VoucherError::Expired {
                ended_at: self.end_date,
            });
        }
        if self
            .usage_limit
            .is_some_and(|limit| self.usage_count >= limit)
        {
            return Err(VoucherError::LimitReached);
        }
        Ok(())
    }

    /// Checks the data-model invariants a stored voucher must satisfy.
    pub fn check_invariants(&self) -> Result<(), ServiceError> {
        if self.discount_value < 0 {
            return Err(invalid("discount_value must not be negative"));
        }
        match self.discount_type {
            DiscountType::Percentage if self.discount_value > 100 => {
                return Err(invalid("percentage discount_value must be within 0..=100"));
            }
            DiscountType::Fixed if self.max_discount.is_some() => {
                return Err(invalid("max_discount only applies to percentage vouchers"));
            }
            _ => {}
        }
        if self.max_discount.is_some_and(|cap| cap < 0) {
            return Err(invalid("max_discount must not be negative"));
        }
        if self.min_purchase.is_some_and(|floor| floor < 0) {
            return Err(invalid("min_purchase must not be negative"));
        }
        if self.start_date >= self.end_date {
            return Err(invalid("start_date must be before end_date"));
        }
        if self.usage_count < 0 {
            return Err(invalid("usage_count must not be negative"));
        }
        if let Some(limit) = self.usage_limit {
            if limit < 0 || self.usage_count > limit {
                return Err(invalid("usage_count must not exceed usage_limit"));
            }
        }
        if self.applicable_products.is_empty_subset()
            || self.applicable_categories.is_empty_subset()
        {
            return Err(invalid("an explicit scope must list at least one id"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ServiceError {
    ServiceError::ValidationError(message.to_string())
}

impl TryFrom<voucher::Model> for Voucher {
    type Error = ServiceError;

    fn try_from(model: voucher::Model) -> Result<Self, Self::Error> {
        let applicable_products = serde_json::from_str(&model.applicable_products)
            .map_err(|e| corrupt_scope(&model.code, e))?;
        let applicable_categories = serde_json::from_str(&model.applicable_categories)
            .map_err(|e| corrupt_scope(&model.code, e))?;

        Ok(Self {
            id: model.id,
            code: model.code,
            description: model.description,
            discount_type: model.discount_type,
            discount_value: model.discount_value,
            max_discount: model.max_discount,
            min_purchase: model.min_purchase,
            start_date: model.start_date,
            end_date: model.end_date,
            is_active: model.is_active,
            usage_limit: model.usage_limit,
            usage_count: model.usage_count,
            applicable_products,
            applicable_categories,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

fn corrupt_scope(code: &str, err: serde_json::Error) -> ServiceError {
    ServiceError::InternalError(format!("voucher {code} has an unreadable scope: {err}"))
}

/// Input for creating a voucher.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewVoucher {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    #[serde(default)]
    pub max_discount: Option<i64>,
    #[serde(default)]
    pub min_purchase: Option<i64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub usage_limit: Option<i32>,
    /// Carried over when importing vouchers that were already redeemed elsewhere.
    #[serde(default)]
    #[validate(range(min = 0))]
    pub usage_count: i32,
    #[serde(default = "all_scope")]
    pub applicable_products: Scope<Uuid>,
    #[serde(default = "all_scope")]
    #[validate(custom = "validate_category_scope")]
    pub applicable_categories: Scope<String>,
}

fn default_active() -> bool {
    true
}

fn all_scope<T>() -> Scope<T> {
    Scope::All
}

fn validate_category_scope(scope: &Scope<String>) -> Result<(), ValidationError> {
    if let Scope::Subset(ids) = scope {
        if ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ValidationError::new("blank_category_id"));
        }
    }
    Ok(())
}

impl NewVoucher {
    /// Builds the voucher that would be stored, normalizing the code.
    pub fn into_voucher(self, now: DateTime<Utc>) -> Voucher {
        Voucher {
            id: Uuid::new_v4(),
            code: normalize_code(&self.code),
            description: self.description,
            discount_type: self.discount_type,
            discount_value: self.discount_value,
            max_discount: self.max_discount,
            min_purchase: self.min_purchase,
            start_date: self.start_date,
            end_date: self.end_date,
            is_active: self.is_active,
            usage_limit: self.usage_limit,
            usage_count: self.usage_count,
            applicable_products: self.applicable_products,
            applicable_categories: self.applicable_categories,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user's collected voucher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoucherClaim {
    pub id: Uuid,
    pub user_id: Uuid,
    pub voucher_id: Uuid,
    pub voucher_code: String,
    pub is_used: bool,
    pub claimed_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}
