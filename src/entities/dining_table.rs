//! Dining table entity.
//!
//! Orders reference tables but do not own them. A table cannot be removed
//! while unpaid orders still point at it; that rule lives in
//! [`crate::core::tables`], not in a cascade.

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Dining table database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dining_tables")]
pub struct Model {
    /// Unique identifier for the table
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Owning branch
    pub branch_id: Uuid,
    /// Label shown to staff (e.g. "T4", "Terrace 2")
    pub name: String,
    /// When the table was created
    pub created_at: DateTimeUtc,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTimeUtc>,
}

/// Tables are referenced by orders
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One table has many orders over its lifetime
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        Self {
            id: Set(Uuid::new_v4()),
            created_at: Set(chrono::Utc::now()),
            ..ActiveModelTrait::default()
        }
    }
}
