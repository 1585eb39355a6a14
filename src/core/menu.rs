//! Menu catalogue - Items with contiguous 1-based positions per category.

use crate::{
    core::{
        atomic::{self, TransactionBounds},
        repository::{Filter, ScopedRepository},
        scope::ScopeContext,
    },
    entities::{menu_item, menu_item_price},
    errors::{Error, Result},
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelBehavior, ColumnTrait, ConnectionTrait, DatabaseConnection, QueryOrder, Set,
    sea_query::Expr,
};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{info, instrument};
use uuid::Uuid;

/// A price variant to create with its item.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewVariant {
    /// Label such as "Small" or "Large"
    pub name: String,
    /// Unit price
    pub price: Decimal,
    /// ISO currency code
    pub currency: String,
    /// Initial stock flag
    #[serde(default)]
    pub out_of_stock: bool,
}

/// Input of [`MenuCatalog::create_item`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewMenuItem {
    /// Category the item is listed under
    pub category_id: Uuid,
    /// Display name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Price variants
    pub variants: Vec<NewVariant>,
}

/// An item with its active variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    /// The item
    pub item: menu_item::Model,
    /// Its variants, in creation order
    pub variants: Vec<menu_item_price::Model>,
}

/// Menu item lifecycle with position maintenance.
#[derive(Debug, Clone, Copy, Default)]
pub struct MenuCatalog {
    bounds: TransactionBounds,
}

impl MenuCatalog {
    /// Creates the catalogue with the given transaction bounds.
    #[must_use]
    pub const fn new(bounds: TransactionBounds) -> Self {
        Self { bounds }
    }

    /// Appends an item at the end of its category, together with its variants.
    ///
    /// # Errors
    /// Returns [`Error::MissingScopeContext`] without a branch scope.
    #[instrument(skip(self, db, new), fields(name = %new.name, category_id = %new.category_id))]
    pub async fn create_item(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        new: NewMenuItem,
    ) -> Result<CatalogItem> {
        let txn = atomic::begin(db, self.bounds).await?;
        let outcome = atomic::within(self.bounds, async {
            let items = ScopedRepository::<menu_item::Entity>::new(*ctx);
            let siblings = items.count(&txn, in_category(new.category_id)).await?;
            let position = next_position(new.category_id, siblings)?;

            let item = items
                .insert(
                    &txn,
                    menu_item::ActiveModel {
                        category_id: Set(new.category_id),
                        name: Set(new.name),
                        description: Set(new.description),
                        position: Set(position),
                        out_of_stock: Set(new.variants.iter().all(|v| v.out_of_stock)),
                        ..ActiveModelBehavior::new()
                    },
                )
                .await?;

            let prices = ScopedRepository::<menu_item_price::Entity>::new(*ctx);
            let mut variants = Vec::with_capacity(new.variants.len());
            for variant in new.variants {
                let row = menu_item_price::ActiveModel {
                    item_id: Set(item.id),
                    name: Set(variant.name),
                    price: Set(variant.price),
                    currency: Set(variant.currency),
                    out_of_stock: Set(variant.out_of_stock),
                    ..ActiveModelBehavior::new()
                };
                variants.push(prices.insert(&txn, row).await?);
            }

            Ok(CatalogItem { item, variants })
        })
        .await;

        let created = atomic::settle(txn, outcome).await?;
        info!(item_id = %created.item.id, position = created.item.position, "Menu item created");
        Ok(created)
    }

    /// Soft-deletes an item and its variants and closes the position gap.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when the item is not visible in `ctx`.
    #[instrument(skip(self, db))]
    pub async fn remove_item(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        item_id: Uuid,
    ) -> Result<()> {
        let txn = atomic::begin(db, self.bounds).await?;
        let outcome = atomic::within(self.bounds, async {
            let items = ScopedRepository::<menu_item::Entity>::new(*ctx);
            let item = items.get(&txn, item_id).await?;

            items.delete(&txn, item.id).await?;
            ScopedRepository::<menu_item_price::Entity>::new(*ctx)
                .delete_many(
                    &txn,
                    Filter::on(menu_item_price::Column::ItemId, |c| c.eq(item.id)),
                )
                .await?;

            items
                .update_many(
                    in_category(item.category_id)
                        .and(menu_item::Column::Position, |c| c.gt(item.position)),
                )?
                .col_expr(
                    menu_item::Column::Position,
                    Expr::col(menu_item::Column::Position).sub(1),
                )
                .exec(&txn)
                .await?;
            Ok(())
        })
        .await;

        atomic::settle(txn, outcome).await?;
        info!(%item_id, "Menu item removed");
        Ok(())
    }

    /// Rewrites a category's positions to follow `ordered_ids`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPositions`] unless `ordered_ids` lists every
    /// active item of the category exactly once.
    #[instrument(skip(self, db, ordered_ids))]
    pub async fn reorder(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        category_id: Uuid,
        ordered_ids: &[Uuid],
    ) -> Result<Vec<menu_item::Model>> {
        let txn = atomic::begin(db, self.bounds).await?;
        let outcome = atomic::within(self.bounds, async {
            let items = ScopedRepository::<menu_item::Entity>::new(*ctx);
            let active: HashSet<Uuid> = items
                .find_many(&txn, in_category(category_id))
                .await?
                .into_iter()
                .map(|item| item.id)
                .collect();
            let requested: HashSet<Uuid> = ordered_ids.iter().copied().collect();

            if requested.len() != ordered_ids.len() {
                return Err(Error::InvalidPositions {
                    category_id,
                    message: "duplicate item ids".to_string(),
                });
            }
            if requested != active {
                return Err(Error::InvalidPositions {
                    category_id,
                    message: format!(
                        "expected the {} active items of the category, got {}",
                        active.len(),
                        ordered_ids.len()
                    ),
                });
            }

            for (preceding, id) in (0_u64..).zip(ordered_ids) {
                let position = next_position(category_id, preceding)?;
                items
                    .update_many(Filter::by_id(*id))?
                    .col_expr(menu_item::Column::Position, Expr::value(position))
                    .exec(&txn)
                    .await?;
            }

            Self::list_category(&txn, ctx, category_id).await
        })
        .await;

        atomic::settle(txn, outcome).await
    }

    /// Active items of a category by position.
    pub async fn list_category<C>(
        conn: &C,
        ctx: &ScopeContext,
        category_id: Uuid,
    ) -> Result<Vec<menu_item::Model>>
    where
        C: ConnectionTrait,
    {
        ScopedRepository::<menu_item::Entity>::new(*ctx)
            .select(in_category(category_id))?
            .order_by_asc(menu_item::Column::Position)
            .all(conn)
            .await
            .map_err(Into::into)
    }
}

fn in_category(category_id: Uuid) -> Filter<menu_item::Entity> {
    Filter::on(menu_item::Column::CategoryId, |c| c.eq(category_id))
}

/// Position following `preceding` items.
fn next_position(category_id: Uuid, preceding: u64) -> Result<i32> {
    preceding
        .checked_add(1)
        .and_then(|position| i32::try_from(position).ok())
        .ok_or_else(|| Error::InvalidPositions {
            category_id,
            message: "category is full".to_string(),
        })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::*;
    use rust_decimal_macros::dec;

    fn dish(category_id: Uuid, name: &str) -> NewMenuItem {
        NewMenuItem {
            category_id,
            name: name.to_string(),
            description: None,
            variants: vec![NewVariant {
                name: "Regular".to_string(),
                price: dec!(9.50),
                currency: "USD".to_string(),
                out_of_stock: false,
            }],
        }
    }

    fn names(items: &[menu_item::Model]) -> Vec<(&str, i32)> {
        items.iter().map(|i| (i.name.as_str(), i.position)).collect()
    }

    #[tokio::test]
    async fn test_items_append_per_category() -> Result<()> {
        let db = setup_test_db().await?;
        let fx = create_branch_fixture(&db, "Tenant A").await?;
        let mains = Uuid::new_v4();
        let drinks = Uuid::new_v4();
        let catalog = MenuCatalog::default();

        catalog.create_item(&db, &fx.ctx, dish(mains, "Steak")).await?;
        catalog.create_item(&db, &fx.ctx, dish(drinks, "Water")).await?;
        let fish = catalog.create_item(&db, &fx.ctx, dish(mains, "Fish")).await?;

        assert_eq!(fish.item.position, 2);
        assert_eq!(fish.item.tenant_id, fx.tenant.id);
        assert_eq!(fish.variants.len(), 1);
        assert_eq!(fish.variants[0].price, dec!(9.50));
        assert!(!fish.item.out_of_stock);

        let listed = MenuCatalog::list_category(&db, &fx.ctx, mains).await?;
        assert_eq!(names(&listed), vec![("Steak", 1), ("Fish", 2)]);

        Ok(())
    }

    #[tokio::test]
    async fn test_item_without_stocked_variants_starts_out_of_stock() -> Result<()> {
        let db = setup_test_db().await?;
        let fx = create_branch_fixture(&db, "Tenant A").await?;
        let mut sold_out = dish(Uuid::new_v4(), "Special");
        sold_out.variants[0].out_of_stock = true;

        let created = MenuCatalog::default().create_item(&db, &fx.ctx, sold_out).await?;
        assert!(created.item.out_of_stock);

        Ok(())
    }

    #[tokio::test]
    async fn test_remove_closes_the_gap() -> Result<()> {
        let db = setup_test_db().await?;
        let fx = create_branch_fixture(&db, "Tenant A").await?;
        let mains = Uuid::new_v4();
        let other = Uuid::new_v4();
        let catalog = MenuCatalog::default();

        catalog.create_item(&db, &fx.ctx, dish(mains, "A")).await?;
        let b = catalog.create_item(&db, &fx.ctx, dish(mains, "B")).await?;
        catalog.create_item(&db, &fx.ctx, dish(mains, "C")).await?;
        catalog.create_item(&db, &fx.ctx, dish(other, "X")).await?;
        catalog.create_item(&db, &fx.ctx, dish(other, "Y")).await?;

        catalog.remove_item(&db, &fx.ctx, b.item.id).await?;

        let mains_left = MenuCatalog::list_category(&db, &fx.ctx, mains).await?;
        assert_eq!(names(&mains_left), vec![("A", 1), ("C", 2)]);
        let others = MenuCatalog::list_category(&db, &fx.ctx, other).await?;
        assert_eq!(names(&others), vec![("X", 1), ("Y", 2)]);

        let variants = ScopedRepository::<menu_item_price::Entity>::new(fx.ctx)
            .count(
                &db,
                Filter::on(menu_item_price::Column::ItemId, |c| c.eq(b.item.id)),
            )
            .await?;
        assert_eq!(variants, 0);

        // The next item fills the compacted sequence
        let d = catalog.create_item(&db, &fx.ctx, dish(mains, "D")).await?;
        assert_eq!(d.item.position, 3);

        assert!(matches!(
            catalog.remove_item(&db, &fx.ctx, b.item.id).await,
            Err(Error::NotFound { entity: "menu_items", .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_reorder_requires_exact_item_set() -> Result<()> {
        let db = setup_test_db().await?;
        let fx = create_branch_fixture(&db, "Tenant A").await?;
        let mains = Uuid::new_v4();
        let catalog = MenuCatalog::default();
        let a = catalog.create_item(&db, &fx.ctx, dish(mains, "A")).await?.item.id;
        let b = catalog.create_item(&db, &fx.ctx, dish(mains, "B")).await?.item.id;
        let c = catalog.create_item(&db, &fx.ctx, dish(mains, "C")).await?.item.id;

        let reordered = catalog.reorder(&db, &fx.ctx, mains, &[c, a, b]).await?;
        assert_eq!(names(&reordered), vec![("C", 1), ("A", 2), ("B", 3)]);

        for bad in [vec![c, a], vec![c, a, a], vec![c, a, b, Uuid::new_v4()]] {
            assert!(matches!(
                catalog.reorder(&db, &fx.ctx, mains, &bad).await,
                Err(Error::InvalidPositions { .. })
            ));
        }

        // Failed attempts changed nothing
        let listed = MenuCatalog::list_category(&db, &fx.ctx, mains).await?;
        assert_eq!(names(&listed), vec![("C", 1), ("A", 2), ("B", 3)]);

        Ok(())
    }
}
