//! Dining tables and the unpaid-order removal guard.

use crate::{
    core::{
        atomic::{self, TransactionBounds},
        repository::{Filter, ScopedRepository},
        scope::ScopeContext,
    },
    entities::{dining_table, order},
    errors::{Error, Result},
};
use sea_orm::{ActiveModelBehavior, ColumnTrait, DatabaseConnection, Set};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Creates and removes the tables of a branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableRegistry {
    bounds: TransactionBounds,
}

impl TableRegistry {
    /// Creates the registry with the given transaction bounds.
    #[must_use]
    pub const fn new(bounds: TransactionBounds) -> Self {
        Self { bounds }
    }

    /// Adds a table to the context's branch.
    pub async fn create_table(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        name: &str,
    ) -> Result<dining_table::Model> {
        ScopedRepository::<dining_table::Entity>::new(*ctx)
            .insert(
                db,
                dining_table::ActiveModel {
                    name: Set(name.to_string()),
                    ..ActiveModelBehavior::new()
                },
            )
            .await
    }

    /// Soft-deletes a table that has no unpaid orders.
    ///
    /// # Errors
    /// - [`Error::NotFound`] when the table is not visible in `ctx`
    /// - [`Error::TableHasUnpaidOrders`] while unpaid orders reference it
    #[instrument(skip(self, db))]
    pub async fn remove_table(
        &self,
        db: &DatabaseConnection,
        ctx: &ScopeContext,
        table_id: Uuid,
    ) -> Result<()> {
        let txn = atomic::begin(db, self.bounds).await?;
        let outcome = atomic::within(self.bounds, async {
            let tables = ScopedRepository::<dining_table::Entity>::new(*ctx);
            tables.get(&txn, table_id).await?;

            let unpaid = ScopedRepository::<order::Entity>::new(*ctx)
                .count(
                    &txn,
                    Filter::on(order::Column::TableId, |c| c.eq(table_id))
                        .and(order::Column::Paid, |c| c.eq(false)),
                )
                .await?;
            if unpaid > 0 {
                warn!(%table_id, unpaid, "Refusing to remove table with unpaid orders");
                return Err(Error::TableHasUnpaidOrders { table_id });
            }

            tables.delete(&txn, table_id).await?;
            Ok(())
        })
        .await;

        atomic::settle(txn, outcome).await?;
        info!(%table_id, "Table removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::query::OrderQueries;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_table_with_unpaid_orders_stays() -> Result<()> {
        let db = setup_test_db().await?;
        let fx = create_branch_fixture(&db, "Tenant A").await?;
        let registry = TableRegistry::default();
        let table = registry.create_table(&db, &fx.ctx, "Patio 1").await?;
        assert_eq!(table.branch_id, fx.branch.id);
        insert_test_order(&db, &fx.ctx, table.id, 1, 0).await?;

        let err = registry.remove_table(&db, &fx.ctx, table.id).await.unwrap_err();
        assert!(matches!(err, Error::TableHasUnpaidOrders { table_id } if table_id == table.id));

        OrderQueries::set_table_paid(&db, &fx.ctx, table.id, true).await?;
        registry.remove_table(&db, &fx.ctx, table.id).await?;

        let tables = ScopedRepository::<dining_table::Entity>::new(fx.ctx);
        assert!(tables.find_by_id(&db, table.id).await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_remove_foreign_table_is_not_found() -> Result<()> {
        let db = setup_test_db().await?;
        let a = create_branch_fixture(&db, "Tenant A").await?;
        let b = create_branch_fixture(&db, "Tenant B").await?;
        let registry = TableRegistry::default();
        let table_b = registry.create_table(&db, &b.ctx, "B1").await?;

        assert!(matches!(
            registry.remove_table(&db, &a.ctx, table_b.id).await,
            Err(Error::NotFound { entity: "dining_tables", .. })
        ));
        let tables = ScopedRepository::<dining_table::Entity>::new(b.ctx);
        assert!(tables.find_by_id(&db, table_b.id).await?.is_some());

        Ok(())
    }
}
