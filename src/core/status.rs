//! Order status transitions and per-table queue promotion.
//!
//! Each table runs a FIFO kitchen queue with one cooking slot: completing an
//! order promotes the next `in_kitchen` order placed after it at the same
//! table to `cooking`.

use crate::{
    core::{
        atomic::{self, TransactionBounds},
        notify::{self, NotificationPort, OrderEvent},
        repository::{Filter, ScopedRepository},
        scope::ScopeContext,
    },
    entities::{OrderStatus, order},
    errors::{Error, Result},
};
use sea_orm::{ColumnTrait, DatabaseConnection, DatabaseTransaction, QueryOrder, sea_query::Expr};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Which status changes are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any status may be set from any other.
    #[default]
    Permissive,
    /// Only `in_kitchen -> cooking -> completed`.
    Strict,
}

impl TransitionPolicy {
    /// Checks a single change against the policy.
    ///
    /// # Errors
    /// Returns [`Error::InvalidTransition`] when the policy rejects it.
    pub fn check(self, from: OrderStatus, to: OrderStatus) -> Result<()> {
        let allowed = match self {
            Self::Permissive => true,
            Self::Strict => matches!(
                (from, to),
                (OrderStatus::InKitchen, OrderStatus::Cooking)
                    | (OrderStatus::Cooking, OrderStatus::Completed)
            ),
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }
}

/// Outcome of one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// The order that was transitioned
    pub order: order::Model,
    /// The queued order promoted to cooking, if any
    pub promoted: Option<order::Model>,
}

impl StatusChange {
    /// Every order whose status changed, in the order they changed.
    pub fn changed(&self) -> impl Iterator<Item = &order::Model> {
        std::iter::once(&self.order).chain(self.promoted.as_ref())
    }
}

/// Applies status transitions and publishes the resulting events.
#[derive(Clone)]
pub struct OrderStateMachine {
    policy: TransitionPolicy,
    bounds: TransactionBounds,
    notifier: Arc<dyn NotificationPort>,
}

impl OrderStateMachine {
    /// Creates a state machine publishing to `notifier`.
    #[must_use]
    pub fn new(
        policy: TransitionPolicy,
        bounds: TransactionBounds,
        notifier: Arc<dyn NotificationPort>,
    ) -> Self {
        Self {
            policy,
            bounds,
            notifier,
        }
    }

    /// Active policy.
    #[must_use]
    pub const fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Sets `order_id` to `new_status`, promoting the next queued order of the
    /// table when the order completes. One `OrderStatusUpdated` event is
    /// published per changed order after commit.
    ///
    /// # Errors
    /// - [`Error::NotFound`] when the order is not visible in `ctx`
    /// - [`Error::InvalidTransition`] when the policy rejects the change
    #[instrument(skip(self, db))]
    pub async fn transition(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<StatusChange> {
        let change = atomic::retry_contended(self.bounds, || {
            self.attempt(db, ctx, order_id, new_status)
        })
        .await?;

        info!(
            order_id = %change.order.id,
            status = %change.order.status,
            promoted = ?change.promoted.as_ref().map(|o| o.id),
            "Order status updated"
        );
        for updated in change.changed() {
            let event = OrderEvent::OrderStatusUpdated {
                branch_id: updated.branch_id,
                order: updated.clone(),
            };
            notify::deliver(self.notifier.as_ref(), event, notify::PUBLISH_TIMEOUT).await;
        }
        Ok(change)
    }

    async fn attempt(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<StatusChange> {
        let txn = atomic::begin(db, self.bounds).await?;
        let outcome =
            atomic::within(self.bounds, self.apply(&txn, ctx, order_id, new_status)).await;
        atomic::settle(txn, outcome).await
    }

    async fn apply(
        &self,
        txn: &DatabaseTransaction,
        ctx: &ScopeContext,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<StatusChange> {
        let orders = ScopedRepository::<order::Entity>::new(*ctx);
        let current = orders.get(txn, order_id).await?;
        self.policy.check(current.status, new_status)?;

        let order = set_status(txn, &orders, current, new_status).await?;
        let promoted = if new_status == OrderStatus::Completed {
            self.promote_next(txn, &orders, &order).await?
        } else {
            None
        };

        Ok(StatusChange { order, promoted })
    }

    async fn promote_next(
        &self,
        txn: &DatabaseTransaction,
        orders: &ScopedRepository<order::Entity>,
        completed: &order::Model,
    ) -> Result<Option<order::Model>> {
        let queued = orders
            .select(
                Filter::on(order::Column::TableId, |c| c.eq(completed.table_id))
                    .and(order::Column::Status, |c| c.eq(OrderStatus::InKitchen))
                    .and(order::Column::CreatedAt, |c| c.gte(completed.created_at))
                    .and(order::Column::Id, |c| c.ne(completed.id)),
            )?
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::OrderNumber)
            .all(txn)
            .await?;

        // Orders sharing the timestamp are queued by order number
        let next = queued.into_iter().find(|candidate| {
            (candidate.created_at, candidate.order_number)
                > (completed.created_at, completed.order_number)
        });

        match next {
            Some(next) => {
                self.policy.check(next.status, OrderStatus::Cooking)?;
                set_status(txn, orders, next, OrderStatus::Cooking)
                    .await
                    .map(Some)
            }
            None => Ok(None),
        }
    }
}

async fn set_status(
    txn: &DatabaseTransaction,
    orders: &ScopedRepository<order::Entity>,
    order: order::Model,
    status: OrderStatus,
) -> Result<order::Model> {
    orders
        .update_many(Filter::by_id(order.id))?
        .col_expr(order::Column::Status, Expr::value(status))
        .exec(txn)
        .await?;
    Ok(order::Model { status, ..order })
}
