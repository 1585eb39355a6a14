//! Branch entity - A physical restaurant location owned by a tenant.
//!
//! The geolocation fields describe where customers may order from:
//! `lat`/`long` in degrees and `radius` in metres.

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Branch database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "branches")]
pub struct Model {
    /// Unique identifier for the branch
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Display name
    pub name: String,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub long: f64,
    /// Allowed ordering radius in metres
    pub radius: f64,
    /// ISO currency code used for the branch's prices
    pub currency: String,
    /// When the branch was created
    pub created_at: DateTimeUtc,
    /// Soft delete timestamp
    pub deleted_at: Option<DateTimeUtc>,
}

/// Defines relationships between Branch and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each branch belongs to one tenant
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
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
