//! Menu item price entity - One priced variant of a menu item ("small", "large").
//!
//! The variant's `out_of_stock` flag is authoritative; the parent item's flag
//! is derived from it.

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Price variant database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "menu_item_prices")]
pub struct Model {
    /// Unique identifier for the variant
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Parent menu item
    pub item_id: Uuid,
    /// Variant label
    pub name: String,
    /// Unit price
    #[sea_orm(column_type = "Decimal(Some((12, 4)))")]
    pub price: Decimal,
    /// ISO currency code
    pub currency: String,
    /// Whether this variant can currently be ordered
    pub out_of_stock: bool,
    /// When the variant was created
    pub created_at: DateTimeUtc,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTimeUtc>,
}

/// Defines relationships between `MenuItemPrice` and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each variant belongs to one menu item
    #[sea_orm(
        belongs_to = "super::menu_item::Entity",
        from = "Column::ItemId",
        to = "super::menu_item::Column::Id"
    )]
    MenuItem,
}

impl Related<super::menu_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MenuItem.def()
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
