//! Stock consistency between menu items and their price variants.
//!
//! A variant's `out_of_stock` flag is authoritative. The item flag is derived:
//! it is true iff no active variant is in stock. Each call runs in one
//! transaction so the two flags never diverge outside of it.

use crate::{
    core::{
        atomic::{self, TransactionBounds},
        repository::{Filter, ScopedRepository},
        scope::ScopeContext,
    },
    entities::{menu_item, menu_item_price},
    errors::{Error, Result},
};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, sea_query::Expr,
};
use tracing::{info, instrument};
use uuid::Uuid;

/// Cascades stock flags between items and variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct StockConsistencyService {
    bounds: TransactionBounds,
}

impl StockConsistencyService {
    /// Creates the service with the given transaction bounds.
    #[must_use]
    pub const fn new(bounds: TransactionBounds) -> Self {
        Self { bounds }
    }

    /// Sets one variant's flag and re-derives the parent item's flag.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the item is not visible in `ctx` or the
    /// variant does not belong to it.
    #[instrument(skip(self, db))]
    pub async fn set_variant_stock(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        item_id: Uuid,
        variant_id: Uuid,
        out_of_stock: bool,
    ) -> Result<menu_item::Model> {
        let txn = atomic::begin(db, self.bounds).await?;
        let outcome = atomic::within(self.bounds, async {
            let item = ScopedRepository::<menu_item::Entity>::new(*ctx)
                .get(&txn, item_id)
                .await?;

            let updated = variants()
                .update_many(
                    Filter::<menu_item_price::Entity>::by_id(variant_id)
                        .and(menu_item_price::Column::ItemId, |c| c.eq(item_id)),
                )?
                .col_expr(menu_item_price::Column::OutOfStock, Expr::value(out_of_stock))
                .exec(&txn)
                .await?;
            if updated.rows_affected == 0 {
                return Err(Error::not_found("menu_item_prices", variant_id));
            }

            rederive_item(&txn, ctx, item).await
        })
        .await;

        let item = atomic::settle(txn, outcome).await?;
        info!(
            item_id = %item.id,
            item_out_of_stock = item.out_of_stock,
            "Variant stock updated"
        );
        Ok(item)
    }

    /// Sets every active variant of an item and the item itself to `out_of_stock`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the item is not visible in `ctx`.
    #[instrument(skip(self, db))]
    pub async fn set_item_stock(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        item_id: Uuid,
        out_of_stock: bool,
    ) -> Result<menu_item::Model> {
        let txn = atomic::begin(db, self.bounds).await?;
        let outcome = atomic::within(self.bounds, async {
            let items = ScopedRepository::<menu_item::Entity>::new(*ctx);
            let item = items.get(&txn, item_id).await?;

            variants()
                .update_many(Filter::on(menu_item_price::Column::ItemId, |c| c.eq(item_id)))?
                .col_expr(menu_item_price::Column::OutOfStock, Expr::value(out_of_stock))
                .exec(&txn)
                .await?;

            set_item_flag(&txn, ctx, item, out_of_stock).await
        })
        .await;

        let item = atomic::settle(txn, outcome).await?;
        info!(item_id = %item.id, out_of_stock, "Item stock updated");
        Ok(item)
    }

    /// The subset of `price_ids` that is currently out of stock, in input order.
    ///
    /// Unknown ids are ignored here; callers resolve them separately.
    pub async fn unavailable_variants<C>(conn: &C, price_ids: &[Uuid]) -> Result<Vec<Uuid>>
    where
        C: ConnectionTrait,
    {
        if price_ids.is_empty() {
            return Ok(Vec::new());
        }
        let flagged = variants()
            .find_many(
                conn,
                Filter::on(menu_item_price::Column::Id, |c| c.is_in(price_ids.iter().copied()))
                    .and(menu_item_price::Column::OutOfStock, |c| c.eq(true)),
            )
            .await?;

        let mut unavailable: Vec<Uuid> = Vec::with_capacity(flagged.len());
        for id in price_ids {
            if flagged.iter().any(|v| v.id == *id) && !unavailable.contains(id) {
                unavailable.push(*id);
            }
        }
        Ok(unavailable)
    }

    /// Whether an item would be out of stock given its current variants.
    pub async fn derived_item_flag<C>(conn: &C, item_id: Uuid) -> Result<bool>
    where
        C: ConnectionTrait,
    {
        let in_stock = variants()
            .count(
                conn,
                Filter::on(menu_item_price::Column::ItemId, |c| c.eq(item_id))
                    .and(menu_item_price::Column::OutOfStock, |c| c.eq(false)),
            )
            .await?;
        Ok(in_stock == 0)
    }
}

fn variants() -> ScopedRepository<menu_item_price::Entity> {
    ScopedRepository::new(ScopeContext::unscoped())
}

async fn rederive_item(
    txn: &DatabaseTransaction,
    ctx: &ScopeContext,
    item: menu_item::Model,
) -> Result<menu_item::Model> {
    let derived = StockConsistencyService::derived_item_flag(txn, item.id).await?;
    if derived == item.out_of_stock {
        return Ok(item);
    }
    set_item_flag(txn, ctx, item, derived).await
}

async fn set_item_flag(
    txn: &DatabaseTransaction,
    ctx: &ScopeContext,
    item: menu_item::Model,
    out_of_stock: bool,
) -> Result<menu_item::Model> {
    ScopedRepository::<menu_item::Entity>::new(*ctx)
        .update_many(Filter::by_id(item.id))?
        .col_expr(menu_item::Column::OutOfStock, Expr::value(out_of_stock))
        .exec(txn)
        .await?;
    Ok(menu_item::Model {
        out_of_stock,
        ..item
    })
}
