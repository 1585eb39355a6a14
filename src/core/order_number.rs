//! Per-branch order number allocation.
//!
//! One counter row per (tenant, branch) holds the last issued number. The
//! allocator only accepts a [`DatabaseTransaction`], so a number is consumed
//! exactly when the surrounding order commits; a rollback restores the
//! counter.

use crate::{
    core::{
        repository::{Filter, ScopedRepository},
        scope::{ScopeContext, ScopedEntity},
    },
    entities::order_number_counter,
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelBehavior, ConnectionTrait, DatabaseTransaction, DbErr, Set, SqlErr,
    sea_query::Expr,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Allocates strictly increasing order numbers per branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderNumberAllocator;

impl OrderNumberAllocator {
    /// Issues the next order number for the context's branch.
    ///
    /// The counter is bumped with a single `UPDATE ... SET last = last + 1`,
    /// which takes the write lock before the value is read back, so two
    /// transactions can never observe the same number. The first order of a
    /// branch creates the row with `1`.
    ///
    /// # Errors
    /// - [`Error::MissingScopeContext`] without tenant and branch
    /// - [`Error::ConflictingOrderNumber`] if a concurrent transaction created
    ///   the counter row first (retryable)
    pub async fn allocate(txn: &DatabaseTransaction, ctx: &ScopeContext) -> Result<i64> {
        let branch_id = ctx.require_branch(order_number_counter::Entity::NAME)?;
        let counters = ScopedRepository::<order_number_counter::Entity>::new(*ctx);

        let bumped = counters
            .update_many(Filter::new())?
            .col_expr(
                order_number_counter::Column::LastOrderNumber,
                Expr::col(order_number_counter::Column::LastOrderNumber).add(1),
            )
            .col_expr(order_number_counter::Column::UpdatedAt, Expr::value(Utc::now()))
            .exec(txn)
            .await?;

        if bumped.rows_affected > 0 {
            let counter = counters
                .find_one(txn, Filter::new())
                .await?
                .ok_or_else(|| Error::not_found(order_number_counter::Entity::NAME, branch_id))?;
            debug!(%branch_id, number = counter.last_order_number, "Allocated order number");
            return Ok(counter.last_order_number);
        }

        counters
            .insert(
                txn,
                order_number_counter::ActiveModel {
                    last_order_number: Set(1),
                    ..ActiveModelBehavior::new()
                },
            )
            .await
            .map_err(|err| conflict_on_unique(err, branch_id))?;
        debug!(%branch_id, "Created order number counter");
        Ok(1)
    }

    /// Last number issued for the context's branch, `0` before the first order.
    pub async fn last_issued<C>(conn: &C, ctx: &ScopeContext) -> Result<i64>
    where
        C: ConnectionTrait,
    {
        Ok(ScopedRepository::<order_number_counter::Entity>::new(*ctx)
            .find_one(conn, Filter::new())
            .await?
            .map_or(0, |counter| counter.last_order_number))
    }
}

/// Maps unique-constraint violations on counter or order rows to
/// [`Error::ConflictingOrderNumber`].
pub(crate) fn conflict_on_unique(err: Error, branch_id: Uuid) -> Error {
    match err {
        Error::Database(db_err) if is_unique_violation(&db_err) => {
            warn!(%branch_id, "Order number conflict");
            Error::ConflictingOrderNumber { branch_id }
        }
        other => other,
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
