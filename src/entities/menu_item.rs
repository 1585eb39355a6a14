//! Menu item entity - A dish or drink offered by a branch.
//!
//! `position` is 1-based and contiguous per (branch, category).
//! `out_of_stock` is derived from the item's variants and maintained by
//! [`crate::core::stock::StockConsistencyService`].

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Menu item database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "menu_items")]
pub struct Model {
    /// Unique identifier for the item
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Owning branch
    pub branch_id: Uuid,
    /// Menu category the item is listed under
    pub category_id: Uuid,
    /// Display name
    pub name: String,
    /// Optional description shown on the menu
    pub description: Option<String>,
    /// 1-based position inside the category
    pub position: i32,
    /// True iff every active variant is out of stock
    pub out_of_stock: bool,
    /// When the item was created
    pub created_at: DateTimeUtc,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTimeUtc>,
}

/// Defines relationships between `MenuItem` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One item has many price variants
    #[sea_orm(has_many = "super::menu_item_price::Entity")]
    Prices,
}

impl Related<super::menu_item_price::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Prices.def()
    }
}

impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        Self {
            id: Set(Uuid::new_v4()),
            out_of_stock: Set(false),
            created_at: Set(chrono::Utc::now()),
            ..ActiveModelTrait::default()
        }
    }
}
