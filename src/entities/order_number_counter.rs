//! Order number counter - One row per (tenant, branch) holding the last issued number.
//!
//! This row is the only hot contended resource in the system. It is only
//! written inside an order transaction.

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Counter database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_number_counters")]
pub struct Model {
    /// Unique identifier for the counter row
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: Uuid,
    /// Owning branch
    pub branch_id: Uuid,
    /// Last order number handed out, never decreases
    pub last_order_number: i64,
    /// When the counter last moved
    pub updated_at: DateTimeUtc,
    /// Soft delete timestamp, never set by the core
    pub deleted_at: Option<DateTimeUtc>,
}

/// The counter has no navigable relations
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        Self {
            id: Set(Uuid::new_v4()),
            updated_at: Set(chrono::Utc::now()),
            ..ActiveModelTrait::default()
        }
    }
}
