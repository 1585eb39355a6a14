//! Tenant entity - The root of every ownership chain.
//!
//! Tenants are created once at onboarding and only ever soft-deleted.
//! They are the only root-scoped entity: reads are filtered on `deleted_at` alone.

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Tenant database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    /// Unique identifier for the tenant
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Display name of the restaurant group
    pub name: String,
    /// Free-form description
    pub description: Option<String>,
    /// When the tenant was onboarded
    pub created_at: DateTimeUtc,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTimeUtc>,
}

/// A tenant owns its branches
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One tenant has many branches
    #[sea_orm(has_many = "super::branch::Entity")]
    Branches,
}

impl Related<super::branch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Branches.def()
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
