//! Shared test utilities.
//!
//! Fixtures run against an in-memory `SQLite` database with a single pooled
//! connection, so transactions are serialized the way a locking store would
//! serialize them. Never touch the connection while holding a transaction
//! from it; that blocks until `max_wait`.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use crate::{
    config::settings::OrderingSettings,
    core::{
        menu::{MenuCatalog, NewMenuItem, NewVariant},
        notify::{NotificationPort, OrderEvent},
        orders::{NewOrderRequest, OrderOrigin, OrderTransactionEngine},
        pricing::OrderLine,
        repository::ScopedRepository,
        scope::ScopeContext,
        tables::TableRegistry,
    },
    entities::{
        OrderStatus, OrderType, branch, dining_table, menu_item, menu_item_price, order, tenant,
    },
    errors::{Error, Result},
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelBehavior, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Set,
};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Routes `tracing` output through the test harness; `RUST_LOG` overrides the
/// `warn` default.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Creates an in-memory `SQLite` database with all tables initialized.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    init_test_tracing();
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// A file-backed `SQLite` database behind a pool of several connections, so
/// concurrent transactions really contend for the write lock. The files are
/// removed on drop.
pub struct FileDatabase {
    /// Pooled connection to the file
    pub db: DatabaseConnection,
    path: PathBuf,
}

impl Drop for FileDatabase {
    fn drop(&mut self) {
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            let _ = std::fs::remove_file(file);
        }
    }
}

/// Creates a fresh database file with up to `max_connections` pooled
/// connections and all tables initialized.
pub async fn setup_file_db(max_connections: u32) -> Result<FileDatabase> {
    init_test_tracing();
    let path = std::env::temp_dir().join(format!("ordering-test-{}.sqlite", Uuid::new_v4()));
    let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
    options
        .max_connections(max_connections)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await?;
    crate::config::database::create_tables(&db).await?;
    Ok(FileDatabase { db, path })
}

/// A tenant with one branch and the branch-level scope.
#[derive(Debug, Clone)]
pub struct BranchFixture {
    /// The tenant
    pub tenant: tenant::Model,
    /// Its branch, located at (0, 0) with a 100 m ordering radius
    pub branch: branch::Model,
    /// Scope of the branch
    pub ctx: ScopeContext,
}

/// Creates a tenant.
pub async fn create_test_tenant<C: ConnectionTrait>(conn: &C, name: &str) -> Result<tenant::Model> {
    ScopedRepository::<tenant::Entity>::new(ScopeContext::unscoped())
        .insert(
            conn,
            tenant::ActiveModel {
                name: Set(name.to_string()),
                ..ActiveModelBehavior::new()
            },
        )
        .await
}

/// Creates a branch of `tenant_id` at (0, 0) with a 100 m radius.
pub async fn create_test_branch(
    db: &DatabaseConnection,
    tenant_id: Uuid,
    name: &str,
) -> Result<branch::Model> {
    ScopedRepository::<branch::Entity>::new(ScopeContext::for_tenant(tenant_id))
        .insert(
            db,
            branch::ActiveModel {
                name: Set(name.to_string()),
                lat: Set(0.0),
                long: Set(0.0),
                radius: Set(100.0),
                currency: Set("USD".to_string()),
                ..ActiveModelBehavior::new()
            },
        )
        .await
}

/// Creates a tenant named `tenant_name` with a "Main" branch.
pub async fn create_branch_fixture(
    db: &DatabaseConnection,
    tenant_name: &str,
) -> Result<BranchFixture> {
    let tenant = create_test_tenant(db, tenant_name).await?;
    let branch = create_test_branch(db, tenant.id, "Main").await?;
    let ctx = ScopeContext::for_branch(tenant.id, branch.id);
    Ok(BranchFixture { tenant, branch, ctx })
}

/// Creates a dining table in the scope's branch.
pub async fn create_test_table(
    db: &DatabaseConnection,
    ctx: &ScopeContext,
    name: &str,
) -> Result<dining_table::Model> {
    TableRegistry::default().create_table(db, ctx, name).await
}

/// Creates a menu item in a fresh category with one in-stock variant per
/// price, named "Variant 1", "Variant 2", ...
pub async fn create_test_menu_item(
    db: &DatabaseConnection,
    ctx: &ScopeContext,
    name: &str,
    prices: &[Decimal],
) -> Result<(menu_item::Model, Vec<menu_item_price::Model>)> {
    let created = MenuCatalog::default()
        .create_item(
            db,
            ctx,
            NewMenuItem {
                category_id: Uuid::new_v4(),
                name: name.to_string(),
                description: None,
                variants: prices
                    .iter()
                    .enumerate()
                    .map(|(index, price)| NewVariant {
                        name: format!("Variant {}", index + 1),
                        price: *price,
                        currency: "USD".to_string(),
                        out_of_stock: false,
                    })
                    .collect(),
            },
        )
        .await?;
    Ok((created.item, created.variants))
}

/// An order line for `quantity` portions of `variant`.
pub fn line(item: &menu_item::Model, variant: &menu_item_price::Model, quantity: i32) -> OrderLine {
    OrderLine::new(item.id, variant.id, quantity)
}

/// A dine-in cashier order.
pub fn cashier_request(table_id: Uuid, lines: Vec<OrderLine>) -> NewOrderRequest {
    NewOrderRequest {
        table_id,
        lines,
        origin: OrderOrigin::Cashier {
            order_type: OrderType::DineIn,
        },
    }
}

/// An engine with default settings publishing to `notifier`.
pub fn test_engine(notifier: Arc<dyn NotificationPort>) -> OrderTransactionEngine {
    OrderTransactionEngine::new(&OrderingSettings::default(), notifier)
}

/// Inserts an `in_kitchen` order directly, bypassing numbering and pricing.
///
/// `created_at` is ten minutes ago plus `offset_secs`, so larger offsets are
/// queued later.
pub async fn insert_test_order(
    db: &DatabaseConnection,
    ctx: &ScopeContext,
    table_id: Uuid,
    order_number: i64,
    offset_secs: i64,
) -> Result<order::Model> {
    ScopedRepository::<order::Entity>::new(*ctx)
        .insert(
            db,
            order::ActiveModel {
                table_id: Set(table_id),
                order_number: Set(order_number),
                order_type: Set(Some(OrderType::DineIn)),
                user_id: Set(None),
                sub_total: Set(dec!(10.00)),
                tax: Set(dec!(1.00)),
                total: Set(dec!(11.00)),
                quantity: Set(1),
                created_at: Set(
                    Utc::now() - Duration::minutes(10) + Duration::seconds(offset_secs),
                ),
                ..ActiveModelBehavior::new()
            },
        )
        .await
}

/// An order model that only exists in memory.
pub fn sample_order(branch_id: Uuid, order_number: i64) -> order::Model {
    order::Model {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        branch_id,
        table_id: Uuid::new_v4(),
        order_number,
        status: OrderStatus::InKitchen,
        order_type: None,
        paid: false,
        user_id: None,
        user_device: String::new(),
        sub_total: dec!(10.00),
        tax: dec!(1.00),
        total: dec!(11.00),
        quantity: 1,
        created_at: Utc::now(),
        deleted_at: None,
    }
}

/// Notifier that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<OrderEvent>>,
}

impl RecordingNotifier {
    /// Events received so far, oldest first.
    pub fn events(&self) -> Vec<OrderEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Notifier whose transport is always down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingNotifier;

#[async_trait]
impl NotificationPort for FailingNotifier {
    async fn publish(&self, _event: OrderEvent) -> Result<()> {
        Err(Error::Io(std::io::Error::other("notification transport down")))
    }
}

/// Notifier whose transport never answers.
#[derive(Debug, Default, Clone, Copy)]
pub struct StalledNotifier;

#[async_trait]
impl NotificationPort for StalledNotifier {
    async fn publish(&self, _event: OrderEvent) -> Result<()> {
        std::future::pending().await
    }
}
