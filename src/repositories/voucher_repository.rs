use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::{user_voucher, voucher};
use crate::errors::{PersistenceError, ServiceError, VoucherError};
use crate::models::voucher::{normalize_code, NewVoucher, Voucher, VoucherClaim};

/// Persistence accessor for vouchers and per-user voucher claims.
#[derive(Debug, Clone)]
pub struct VoucherRepository {
    db: Arc<DatabaseConnection>,
}

impl VoucherRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a new voucher after checking its invariants.
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: NewVoucher) -> Result<Voucher, ServiceError> {
        input.validate()?;
        let voucher = input.into_voucher(Utc::now());
        voucher.check_invariants()?;

        let applicable_products = serde_json::to_string(&voucher.applicable_products)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        let applicable_categories = serde_json::to_string(&voucher.applicable_categories)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;

        voucher::ActiveModel {
            id: Set(voucher.id),
            code: Set(voucher.code.clone()),
            description: Set(voucher.description.clone()),
            discount_type: Set(voucher.discount_type),
            discount_value: Set(voucher.discount_value),
            max_discount: Set(voucher.max_discount),
            min_purchase: Set(voucher.min_purchase),
            start_date: Set(voucher.start_date),
            end_date: Set(voucher.end_date),
            is_active: Set(voucher.is_active),
            usage_limit: Set(voucher.usage_limit),
            usage_count: Set(voucher.usage_count),
            applicable_products: Set(applicable_products),
            applicable_categories: Set(applicable_categories),
            created_at: Set(voucher.created_at),
            updated_at: Set(voucher.updated_at),
        }
        .insert(self.db.as_ref())
        .await
        .map_err(|err| match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ServiceError::ValidationError(format!(
                "voucher code {} already exists",
                voucher.code
            )),
            _ => err.into(),
        })?;

        info!(voucher_id = %voucher.id, "voucher created");
        Ok(voucher)
    }

    /// Looks a voucher up by code; the probe is normalized first.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<Voucher>, ServiceError> {
        voucher::Entity::find()
            .filter(voucher::Column::Code.eq(normalize_code(code)))
            .one(self.db.as_ref())
            .await?
            .map(Voucher::try_from)
            .transpose()
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Voucher>, ServiceError> {
        voucher::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(Voucher::try_from)
            .transpose()
    }

    /// Records that `user_id` collected the voucher identified by `code`.
    ///
    /// Only vouchers that are currently redeemable can be collected.
    #[instrument(skip(self))]
    pub async fn claim(
        &self,
        user_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<VoucherClaim, ServiceError> {
        let voucher = self
            .find_by_code(code)
            .await?
            .ok_or(VoucherError::NotFound)?;
        voucher.availability(now)?;

        let claim = user_voucher::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            voucher_id: Set(voucher.id),
            is_used: Set(false),
            claimed_at: Set(now),
            used_at: Set(None),
        }
        .insert(self.db.as_ref())
        .await?;

        info!(claim_id = %claim.id, voucher_id = %voucher.id, "voucher claimed");
        Ok(VoucherClaim {
            id: claim.id,
            user_id: claim.user_id,
            voucher_id: claim.voucher_id,
            voucher_code: voucher.code,
            is_used: claim.is_used,
            claimed_at: claim.claimed_at,
            used_at: claim.used_at,
        })
    }

    /// The user's claims, newest first.
    pub async fn claims_for_user(&self, user_id: Uuid) -> Result<Vec<VoucherClaim>, ServiceError> {
        let rows = user_voucher::Entity::find()
            .filter(user_voucher::Column::UserId.eq(user_id))
            .order_by_desc(user_voucher::Column::ClaimedAt)
            .find_also_related(voucher::Entity)
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(claim, voucher)| VoucherClaim {
                id: claim.id,
                user_id: claim.user_id,
                voucher_id: claim.voucher_id,
                voucher_code: voucher.map(|v| v.code).unwrap_or_default(),
                is_used: claim.is_used,
                claimed_at: claim.claimed_at,
                used_at: claim.used_at,
            })
            .collect())
    }

    /// Accounts one redemption of `voucher_id` by `user_id`.
    ///
    /// In a single transaction: increments `usage_count` only while it is below
    /// `usage_limit`, then flips the user's oldest unused claim if they hold one.
    /// Returns the id of the flipped claim. Nothing is written unless both
    /// steps succeed.
    #[instrument(skip(self))]
    pub async fn consume(
        &self,
        voucher_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, ServiceError> {
        let txn = self.db.begin().await?;

        let counted = voucher::Entity::update_many()
            .col_expr(
                voucher::Column::UsageCount,
                Expr::col(voucher::Column::UsageCount).add(1),
            )
            .col_expr(voucher::Column::UpdatedAt, Expr::value(now))
            .filter(voucher::Column::Id.eq(voucher_id))
            .filter(
                Condition::any()
                    .add(voucher::Column::UsageLimit.is_null())
                    .add(
                        Expr::col(voucher::Column::UsageCount)
                            .lt(Expr::col(voucher::Column::UsageLimit)),
                    ),
            )
            .exec(&txn)
            .await?;

        if counted.rows_affected == 0 {
            txn.rollback().await?;
            debug!("usage limit reached at commit time");
            return Err(VoucherError::LimitReached.into());
        }

        let claim = user_voucher::Entity::find()
            .filter(user_voucher::Column::UserId.eq(user_id))
            .filter(user_voucher::Column::VoucherId.eq(voucher_id))
            .filter(user_voucher::Column::IsUsed.eq(false))
            .order_by_asc(user_voucher::Column::ClaimedAt)
            .order_by_asc(user_voucher::Column::Id)
            .one(&txn)
            .await?;

        let flipped = match claim {
            Some(claim) => {
                let result = user_voucher::Entity::update_many()
                    .col_expr(user_voucher::Column::IsUsed, Expr::value(true))
                    .col_expr(user_voucher::Column::UsedAt, Expr::value(now))
                    .filter(user_voucher::Column::Id.eq(claim.id))
                    .filter(user_voucher::Column::IsUsed.eq(false))
                    .exec(&txn)
                    .await?;

                if result.rows_affected == 0 {
                    txn.rollback().await?;
                    return Err(PersistenceError::WriteConflict(format!(
                        "claim {} was used concurrently",
                        claim.id
                    ))
                    .into());
                }
                Some(claim.id)
            }
            None => None,
        };

        txn.commit().await?;
        Ok(flipped)
    }
}
