//! Database connection and schema bootstrap.
//!
//! Tables are generated from the entity definitions with
//! `Schema::create_table_from_entity`; the unique indexes that order numbering
//! relies on are added explicitly.

use crate::{
    config::settings::DatabaseSettings,
    entities::{
        Branch, DiningTable, MenuItem, MenuItemPrice, Order, OrderItem, OrderNumberCounter,
        Tenant, order, order_number_counter,
    },
    errors::Result,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
    sea_query::{Index, IndexCreateStatement},
};
use tracing::{debug, info};

/// Connects using the `[database]` settings.
pub async fn create_connection(settings: &DatabaseSettings) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(settings.url.clone());
    options
        .max_connections(settings.max_connections.max(1))
        .sqlx_logging(false);
    info!(url = %settings.url, "Connecting to database");
    Database::connect(options).await.map_err(Into::into)
}

/// Creates every table and index that does not exist yet.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    create_table(db, Tenant).await?;
    create_table(db, Branch).await?;
    create_table(db, DiningTable).await?;
    create_table(db, MenuItem).await?;
    create_table(db, MenuItemPrice).await?;
    create_table(db, Order).await?;
    create_table(db, OrderItem).await?;
    create_table(db, OrderNumberCounter).await?;

    let builder = db.get_database_backend();
    for index in unique_indexes() {
        db.execute(builder.build(&index)).await?;
    }

    debug!("Schema ready");
    Ok(())
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<()> {
    let builder = db.get_database_backend();
    let mut table = Schema::new(builder).create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(builder.build(&table)).await?;
    Ok(())
}

fn unique_indexes() -> [IndexCreateStatement; 2] {
    [
        Index::create()
            .name("ux_order_number_counters_branch")
            .table(OrderNumberCounter)
            .col(order_number_counter::Column::TenantId)
            .col(order_number_counter::Column::BranchId)
            .unique()
            .if_not_exists()
            .to_owned(),
        Index::create()
            .name("ux_orders_branch_order_number")
            .table(Order)
            .col(order::Column::TenantId)
            .col(order::Column::BranchId)
            .col(order::Column::OrderNumber)
            .unique()
            .if_not_exists()
            .to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::repository::{Filter, ScopedRepository};
    use crate::core::scope::ScopeContext;
    use crate::entities::tenant;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_create_connection_and_schema() -> Result<()> {
        let settings = DatabaseSettings {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        let db = create_connection(&settings).await?;
        create_tables(&db).await?;
        // Idempotent
        create_tables(&db).await?;

        let tenants = ScopedRepository::<tenant::Entity>::new(ScopeContext::unscoped());
        assert_eq!(tenants.count(&db, Filter::new()).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_one_counter_row_per_branch() -> Result<()> {
        use sea_orm::{ActiveModelBehavior, ActiveModelTrait, Set};

        let db = setup_test_db().await?;
        let fx = create_branch_fixture(&db, "Tenant A").await?;
        let row = || order_number_counter::ActiveModel {
            tenant_id: Set(fx.tenant.id),
            branch_id: Set(fx.branch.id),
            last_order_number: Set(1),
            ..ActiveModelBehavior::new()
        };

        row().insert(&db).await?;
        assert!(row().insert(&db).await.is_err());
        Ok(())
    }
}
