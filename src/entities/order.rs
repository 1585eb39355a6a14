//! Order entity - A customer or cashier order placed at a branch table.
//!
//! `order_number` is unique per (tenant, branch) and allocated by
//! [`crate::core::order_number::OrderNumberAllocator`]. Totals are stored
//! with two fractional digits and `total == sub_total + tax` holds for
//! every committed row.

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kitchen status of an order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Waiting in the table's kitchen queue
    #[sea_orm(string_value = "in_kitchen")]
    InKitchen,
    /// Currently being prepared
    #[sea_orm(string_value = "cooking")]
    Cooking,
    /// Served
    #[sea_orm(string_value = "completed")]
    Completed,
}

impl OrderStatus {
    /// Wire name of the status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InKitchen => "in_kitchen",
            Self::Cooking => "cooking",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a cashier-created order is served. Orthogonal to [`OrderStatus`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Eaten at the table
    #[sea_orm(string_value = "dine_in")]
    DineIn,
    /// Packed to go
    #[sea_orm(string_value = "takeaway")]
    Takeaway,
}

/// Order database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    /// Storage identifier
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Owning branch
    pub branch_id: Uuid,
    /// Table the order was placed at
    pub table_id: Uuid,
    /// Branch-local sequential number shown to guests and staff
    pub order_number: i64,
    /// Kitchen status
    pub status: OrderStatus,
    /// Dine-in or takeaway, set for cashier orders
    pub order_type: Option<OrderType>,
    /// Whether the bill has been settled
    pub paid: bool,
    /// Customer account that placed the order, if any
    pub user_id: Option<Uuid>,
    /// Device fingerprint of the ordering client (empty for cashier orders)
    pub user_device: String,
    /// Sum of line totals
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub sub_total: Decimal,
    /// Tax on the subtotal
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub tax: Decimal,
    /// `sub_total + tax`
    #[sea_orm(column_type = "Decimal(Some((12, 2)))")]
    pub total: Decimal,
    /// Sum of line quantities
    pub quantity: i32,
    /// When the order was placed
    pub created_at: DateTimeUtc,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTimeUtc>,
}

/// Defines relationships between Order and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each order is placed at one table
    #[sea_orm(
        belongs_to = "super::dining_table::Entity",
        from = "Column::TableId",
        to = "super::dining_table::Column::Id"
    )]
    DiningTable,
    /// One order has many lines
    #[sea_orm(has_many = "super::order_item::Entity")]
    Items,
}

impl Related<super::dining_table::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DiningTable.def()
    }
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        Self {
            id: Set(Uuid::new_v4()),
            status: Set(OrderStatus::InKitchen),
            paid: Set(false),
            user_device: Set(String::new()),
            created_at: Set(chrono::Utc::now()),
            ..ActiveModelTrait::default()
        }
    }
}
