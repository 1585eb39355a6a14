//! Tenant/branch scoping - The per-request context and the static entity classification.
//!
//! A [`ScopeContext`] is built once per inbound request from the `x-tenant-id`
//! and `x-branch-id` headers and never mutated afterwards. Each entity declares
//! its [`Scope`] through [`ScopedEntity`]; [`crate::core::repository`] reads both
//! to decide which identifiers are injected into every query.

use crate::{
    entities::{
        branch, dining_table, menu_item, menu_item_price, order, order_item,
        order_number_counter, tenant,
    },
    errors::{Error, Result},
};
use sea_orm::EntityTrait;
use uuid::Uuid;

/// Header carrying the tenant identifier.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the branch identifier.
pub const BRANCH_HEADER: &str = "x-branch-id";

/// Immutable per-request scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeContext {
    tenant_id: Option<Uuid>,
    branch_id: Option<Uuid>,
}

impl ScopeContext {
    /// Creates a context from optional identifiers.
    #[must_use]
    pub const fn new(tenant_id: Option<Uuid>, branch_id: Option<Uuid>) -> Self {
        Self {
            tenant_id,
            branch_id,
        }
    }

    /// Context for branch-level work (orders, tables, menu).
    #[must_use]
    pub const fn for_branch(tenant_id: Uuid, branch_id: Uuid) -> Self {
        Self::new(Some(tenant_id), Some(branch_id))
    }

    /// Context for tenant-level work (branch management).
    #[must_use]
    pub const fn for_tenant(tenant_id: Uuid) -> Self {
        Self::new(Some(tenant_id), None)
    }

    /// Context without any identifiers. Only root-scoped entities are reachable.
    #[must_use]
    pub const fn unscoped() -> Self {
        Self::new(None, None)
    }

    /// Reads the scope headers of a request.
    ///
    /// Header names match case-insensitively. Missing or blank headers leave
    /// the field unset; the failure is deferred until a scoped entity is
    /// touched.
    ///
    /// # Errors
    /// Returns [`Error::InvalidScopeHeader`] if a header is not a UUID.
    pub fn from_headers<'a, I>(headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut ctx = Self::unscoped();
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(TENANT_HEADER) {
                ctx.tenant_id = parse_header(TENANT_HEADER, value)?;
            } else if name.eq_ignore_ascii_case(BRANCH_HEADER) {
                ctx.branch_id = parse_header(BRANCH_HEADER, value)?;
            }
        }
        Ok(ctx)
    }

    /// Tenant identifier, if present.
    #[must_use]
    pub const fn tenant(&self) -> Option<Uuid> {
        self.tenant_id
    }

    /// Branch identifier, if present.
    #[must_use]
    pub const fn branch(&self) -> Option<Uuid> {
        self.branch_id
    }

    /// Tenant identifier required by `entity`.
    ///
    /// # Errors
    /// Returns [`Error::MissingScopeContext`] when no tenant is set.
    pub fn require_tenant(&self, entity: &'static str) -> Result<Uuid> {
        self.tenant_id.ok_or(Error::MissingScopeContext {
            entity,
            field: "tenant_id",
        })
    }

    /// Branch identifier required by `entity`.
    ///
    /// # Errors
    /// Returns [`Error::MissingScopeContext`] when no branch is set.
    pub fn require_branch(&self, entity: &'static str) -> Result<Uuid> {
        self.branch_id.ok_or(Error::MissingScopeContext {
            entity,
            field: "branch_id",
        })
    }
}

fn parse_header(header: &'static str, value: &str) -> Result<Option<Uuid>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(value)
        .map(Some)
        .map_err(|_| Error::InvalidScopeHeader {
            header,
            value: value.to_string(),
        })
}

/// Static scope classification of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// No tenant or branch columns; only soft-delete filtering applies.
    /// Child rows (variants, order lines) are reached through a scoped parent.
    Root,
    /// Filtered on `tenant_id`.
    Tenant,
    /// Filtered on `tenant_id` and `branch_id`.
    Branch,
}

/// An entity the scoped repository can serve.
pub trait ScopedEntity: EntityTrait + Default {
    /// Table name used in errors and logs.
    const NAME: &'static str;
    /// Scope classification.
    const SCOPE: Scope;

    /// Primary key column.
    fn id_col() -> Self::Column;

    /// Soft delete timestamp column.
    fn deleted_at_col() -> Self::Column;

    /// Tenant column for tenant- and branch-scoped entities.
    fn tenant_col() -> Option<Self::Column> {
        None
    }

    /// Branch column for branch-scoped entities.
    fn branch_col() -> Option<Self::Column> {
        None
    }
}

impl ScopedEntity for tenant::Entity {
    const NAME: &'static str = "tenants";
    const SCOPE: Scope = Scope::Root;

    fn id_col() -> Self::Column {
        tenant::Column::Id
    }

    fn deleted_at_col() -> Self::Column {
        tenant::Column::DeletedAt
    }
}

impl ScopedEntity for branch::Entity {
    const NAME: &'static str = "branches";
    const SCOPE: Scope = Scope::Tenant;

    fn id_col() -> Self::Column {
        branch::Column::Id
    }

    fn deleted_at_col() -> Self::Column {
        branch::Column::DeletedAt
    }

    fn tenant_col() -> Option<Self::Column> {
        Some(branch::Column::TenantId)
    }
}

impl ScopedEntity for dining_table::Entity {
    const NAME: &'static str = "dining_tables";
    const SCOPE: Scope = Scope::Branch;

    fn id_col() -> Self::Column {
        dining_table::Column::Id
    }

    fn deleted_at_col() -> Self::Column {
        dining_table::Column::DeletedAt
    }

    fn tenant_col() -> Option<Self::Column> {
        Some(dining_table::Column::TenantId)
    }

    fn branch_col() -> Option<Self::Column> {
        Some(dining_table::Column::BranchId)
    }
}

impl ScopedEntity for menu_item::Entity {
    const NAME: &'static str = "menu_items";
    const SCOPE: Scope = Scope::Branch;

    fn id_col() -> Self::Column {
        menu_item::Column::Id
    }

    fn deleted_at_col() -> Self::Column {
        menu_item::Column::DeletedAt
    }

    fn tenant_col() -> Option<Self::Column> {
        Some(menu_item::Column::TenantId)
    }

    fn branch_col() -> Option<Self::Column> {
        Some(menu_item::Column::BranchId)
    }
}

impl ScopedEntity for menu_item_price::Entity {
    const NAME: &'static str = "menu_item_prices";
    const SCOPE: Scope = Scope::Root;

    fn id_col() -> Self::Column {
        menu_item_price::Column::Id
    }

    fn deleted_at_col() -> Self::Column {
        menu_item_price::Column::DeletedAt
    }
}

impl ScopedEntity for order::Entity {
    const NAME: &'static str = "orders";
    const SCOPE: Scope = Scope::Branch;

    fn id_col() -> Self::Column {
        order::Column::Id
    }

    fn deleted_at_col() -> Self::Column {
        order::Column::DeletedAt
    }

    fn tenant_col() -> Option<Self::Column> {
        Some(order::Column::TenantId)
    }

    fn branch_col() -> Option<Self::Column> {
        Some(order::Column::BranchId)
    }
}

impl ScopedEntity for order_item::Entity {
    const NAME: &'static str = "order_items";
    const SCOPE: Scope = Scope::Root;

    fn id_col() -> Self::Column {
        order_item::Column::Id
    }

    fn deleted_at_col() -> Self::Column {
        order_item::Column::DeletedAt
    }
}

impl ScopedEntity for order_number_counter::Entity {
    const NAME: &'static str = "order_number_counters";
    const SCOPE: Scope = Scope::Branch;

    fn id_col() -> Self::Column {
        order_number_counter::Column::Id
    }

    fn deleted_at_col() -> Self::Column {
        order_number_counter::Column::DeletedAt
    }

    fn tenant_col() -> Option<Self::Column> {
        Some(order_number_counter::Column::TenantId)
    }

    fn branch_col() -> Option<Self::Column> {
        Some(order_number_counter::Column::BranchId)
    }
}
