//! Order transaction engine - Creates orders atomically and drives their status.
//!
//! `create_order` validates the branch and table, prices the lines, allocates
//! the branch's next order number and writes the order with its lines, all in
//! one bounded transaction. Either the counter bump, the order and its lines
//! all commit, or none of them do. The `newOrder` event is published only after
//! commit.

use crate::{
    config::settings::OrderingSettings,
    core::{
        atomic::{self, TransactionBounds},
        geo::{self, GeoPoint},
        notify::{self, NotificationPort, OrderEvent, PlacedOrder},
        order_number::{OrderNumberAllocator, conflict_on_unique},
        pricing::{OrderLine, PricedOrder, PricingEngine},
        repository::ScopedRepository,
        scope::{ScopeContext, ScopedEntity},
        status::{OrderStateMachine, StatusChange},
    },
    entities::{OrderStatus, OrderType, branch, dining_table, order, order_item},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{ActiveModelBehavior, DatabaseConnection, DatabaseTransaction, Set};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Who placed an order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum OrderOrigin {
    /// A guest ordering from their own device.
    Customer {
        /// Account of the guest, if signed in
        user_id: Option<Uuid>,
        /// Device fingerprint of the ordering client
        device: String,
        /// Where the guest was when ordering
        location: Option<GeoPoint>,
    },
    /// Staff ordering on behalf of a table.
    Cashier {
        /// Dine-in or takeaway
        order_type: OrderType,
    },
}

/// Input of [`OrderTransactionEngine::create_order`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewOrderRequest {
    /// Table the order is placed at
    pub table_id: Uuid,
    /// Requested lines
    pub lines: Vec<OrderLine>,
    /// Customer or cashier metadata
    #[serde(flatten)]
    pub origin: OrderOrigin,
}

/// Orchestrates pricing, numbering, persistence and notification of orders.
#[derive(Clone)]
pub struct OrderTransactionEngine {
    pricing: PricingEngine,
    bounds: TransactionBounds,
    enforce_order_radius: bool,
    states: OrderStateMachine,
    notifier: Arc<dyn NotificationPort>,
}

impl OrderTransactionEngine {
    /// Builds the engine from the `[ordering]` settings.
    #[must_use]
    pub fn new(settings: &OrderingSettings, notifier: Arc<dyn NotificationPort>) -> Self {
        let bounds = settings.bounds();
        Self {
            pricing: PricingEngine::new(settings.tax_rate),
            bounds,
            enforce_order_radius: settings.enforce_order_radius,
            states: OrderStateMachine::new(settings.policy(), bounds, Arc::clone(&notifier)),
            notifier,
        }
    }

    /// Pricing rules used for new orders.
    #[must_use]
    pub const fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    /// The status state machine sharing this engine's notifier.
    #[must_use]
    pub const fn states(&self) -> &OrderStateMachine {
        &self.states
    }

    /// Creates an order for the context's branch.
    ///
    /// # Errors
    /// - [`Error::MissingScopeContext`] without tenant and branch
    /// - [`Error::NotFound`] for an unknown branch, table, item or variant
    /// - [`Error::OutsideOrderRadius`] when the radius check is on and the
    ///   customer is too far away
    /// - [`Error::StockUnavailable`], [`Error::EmptyOrder`],
    ///   [`Error::InvalidQuantity`] from pricing
    /// - [`Error::ConflictingOrderNumber`] / [`Error::TransactionTimeout`],
    ///   both retryable; contended attempts are already retried internally
    ///   until `max_wait` runs out
    #[instrument(
        skip(self, db, request),
        fields(table_id = %request.table_id, lines = request.lines.len())
    )]
    pub async fn create_order(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        request: NewOrderRequest,
    ) -> Result<PlacedOrder> {
        let placed =
            atomic::retry_contended(self.bounds, || self.attempt(db, ctx, &request)).await?;

        info!(
            order_id = %placed.order.id,
            order_number = placed.order.order_number,
            total = %placed.order.total,
            "Order created"
        );
        let event = OrderEvent::NewOrder {
            branch_id: placed.order.branch_id,
            order: placed.clone(),
        };
        notify::deliver(self.notifier.as_ref(), event, notify::PUBLISH_TIMEOUT).await;

        Ok(placed)
    }

    /// Changes an order's status; see [`OrderStateMachine::transition`].
    ///
    /// # Errors
    /// Propagates the state machine's errors.
    pub async fn update_status(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<StatusChange> {
        self.states.transition(db, ctx, order_id, status).await
    }

    async fn attempt(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        request: &NewOrderRequest,
    ) -> Result<PlacedOrder> {
        let txn = atomic::begin(db, self.bounds).await?;
        let outcome = atomic::within(self.bounds, self.place(&txn, ctx, request.clone())).await;
        atomic::settle(txn, outcome).await
    }

    async fn place(
        &self,
        txn: &DatabaseTransaction,
        ctx: &ScopeContext,
        request: NewOrderRequest,
    ) -> Result<PlacedOrder> {
        let branch_id = ctx.require_branch(order::Entity::NAME)?;
        // The counter bump is the first statement, so the transaction holds
        // the write lock before it reads anything
        let order_number = OrderNumberAllocator::allocate(txn, ctx).await?;

        let branch = ScopedRepository::<branch::Entity>::new(*ctx)
            .get(txn, branch_id)
            .await?;
        let table = ScopedRepository::<dining_table::Entity>::new(*ctx)
            .get(txn, request.table_id)
            .await?;

        self.check_radius(&branch, &request.origin)?;

        let priced = self.pricing.price(txn, ctx, request.lines).await?;
        debug!(order_number, sub_total = %priced.sub_total, "Persisting order");

        let order = ScopedRepository::<order::Entity>::new(*ctx)
            .insert(txn, new_order(table.id, order_number, &priced, request.origin))
            .await
            .map_err(|err| conflict_on_unique(err, branch.id))?;

        let items = order_items(order.id, priced);
        ScopedRepository::<order_item::Entity>::new(*ctx)
            .insert_many(txn, items.iter().map(item_row))
            .await?;

        Ok(PlacedOrder { order, items })
    }

    fn check_radius(&self, branch: &branch::Model, origin: &OrderOrigin) -> Result<()> {
        let OrderOrigin::Customer {
            location: Some(location),
            ..
        } = origin
        else {
            return Ok(());
        };
        if !self.enforce_order_radius {
            return Ok(());
        }

        let distance_m = geo::distance_meters(GeoPoint::new(branch.lat, branch.long), *location);
        if distance_m > branch.radius {
            return Err(Error::OutsideOrderRadius {
                distance_m,
                radius_m: branch.radius,
            });
        }
        Ok(())
    }
}

fn new_order(
    table_id: Uuid,
    order_number: i64,
    priced: &PricedOrder,
    origin: OrderOrigin,
) -> order::ActiveModel {
    let mut row = order::ActiveModel {
        table_id: Set(table_id),
        order_number: Set(order_number),
        sub_total: Set(priced.sub_total),
        tax: Set(priced.tax),
        total: Set(priced.total),
        quantity: Set(priced.quantity),
        order_type: Set(None),
        user_id: Set(None),
        ..ActiveModelBehavior::new()
    };
    match origin {
        OrderOrigin::Customer {
            user_id, device, ..
        } => {
            row.user_id = Set(user_id);
            row.user_device = Set(device);
        }
        OrderOrigin::Cashier { order_type } => {
            row.order_type = Set(Some(order_type));
        }
    }
    row
}

fn order_items(order_id: Uuid, priced: PricedOrder) -> Vec<order_item::Model> {
    let now = Utc::now();
    priced
        .lines
        .into_iter()
        .map(|line| order_item::Model {
            id: Uuid::new_v4(),
            order_id,
            item_id: line.line.item_id,
            price_id: line.line.price_id,
            quantity: line.line.quantity,
            total: line.total,
            special_instructions: line.line.special_instructions,
            created_at: now,
            deleted_at: None,
        })
        .collect()
}

fn item_row(item: &order_item::Model) -> order_item::ActiveModel {
    order_item::ActiveModel {
        id: Set(item.id),
        order_id: Set(item.order_id),
        item_id: Set(item.item_id),
        price_id: Set(item.price_id),
        quantity: Set(item.quantity),
        total: Set(item.total),
        special_instructions: Set(item.special_instructions.clone()),
        created_at: Set(item.created_at),
        deleted_at: Set(None),
    }
}
