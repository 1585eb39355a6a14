//! Scoped repository - Every data access of the core goes through here.
//!
//! The repository ANDs the caller's [`Filter`] with `deleted_at IS NULL` and,
//! depending on the entity's [`Scope`], with `tenant_id`/`branch_id` taken from
//! the [`ScopeContext`]. Scope columns supplied by the caller are dropped, not
//! merged. Deletes are rewritten into updates of `deleted_at`; no physical
//! delete is ever issued.

use crate::{
    core::scope::{Scope, ScopeContext, ScopedEntity},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    IdenStatic, IntoActiveModel, PaginatorTrait, QueryFilter, QuerySelect, Select, TryGetable,
    UpdateMany,
    sea_query::{Expr, SimpleExpr},
};
use std::marker::PhantomData;
use tracing::{debug, warn};
use uuid::Uuid;

/// Column-tagged filter clauses for an entity.
///
/// Each clause remembers the column it constrains so that scope columns can be
/// stripped before the scope condition is applied.
pub struct Filter<E: EntityTrait> {
    clauses: Vec<(E::Column, SimpleExpr)>,
}

impl<E: EntityTrait> Default for Filter<E> {
    fn default() -> Self {
        Self {
            clauses: Vec::new(),
        }
    }
}

impl<E: EntityTrait> Filter<E> {
    /// An empty filter (matches every row in scope).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a clause on `column`, built by `build`.
    ///
    /// ```ignore
    /// Filter::on(order::Column::TableId, |c| c.eq(table_id))
    ///     .and(order::Column::Paid, |c| c.eq(false))
    /// ```
    #[must_use]
    pub fn and<F>(mut self, column: E::Column, build: F) -> Self
    where
        F: FnOnce(E::Column) -> SimpleExpr,
    {
        self.clauses.push((column, build(column)));
        self
    }

    /// Adds a clause only when `value` is present.
    #[must_use]
    pub fn and_some<T, F>(self, column: E::Column, value: Option<T>, build: F) -> Self
    where
        F: FnOnce(E::Column, T) -> SimpleExpr,
    {
        match value {
            Some(value) => self.and(column, |c| build(c, value)),
            None => self,
        }
    }

    /// A filter whose entity is taken from `column`.
    ///
    /// ```ignore
    /// Filter::on(order::Column::Paid, |c| c.eq(false))
    /// ```
    #[must_use]
    pub fn on<C, F>(column: C, build: F) -> Self
    where
        C: ColumnTrait<EntityName = E>,
        E: EntityTrait<Column = C>,
        F: FnOnce(C) -> SimpleExpr,
    {
        Self::new().and(column, build)
    }
}

impl<E: ScopedEntity> Filter<E> {
    /// Filter matching a single primary key.
    #[must_use]
    pub fn by_id(id: Uuid) -> Self {
        Self::new().and(E::id_col(), |c| c.eq(id))
    }
}

/// Typed, scope-enforcing access to one entity.
#[derive(Debug, Clone, Copy)]
pub struct ScopedRepository<E> {
    ctx: ScopeContext,
    entity: PhantomData<E>,
}

impl<E> ScopedRepository<E>
where
    E: ScopedEntity,
    E::Model: Send + Sync,
{
    /// Creates a repository bound to one request's scope.
    #[must_use]
    pub const fn new(ctx: ScopeContext) -> Self {
        Self {
            ctx,
            entity: PhantomData,
        }
    }

    /// The scope this repository enforces.
    #[must_use]
    pub const fn context(&self) -> &ScopeContext {
        &self.ctx
    }

    /// Scope columns and the values the context forces onto them.
    fn scope_values(&self) -> Result<Vec<(E::Column, Uuid)>> {
        let tenant_column = || {
            E::tenant_col().ok_or_else(|| Error::Config {
                message: format!("{} is scoped but declares no tenant column", E::NAME),
            })
        };
        let branch_column = || {
            E::branch_col().ok_or_else(|| Error::Config {
                message: format!("{} is branch-scoped but declares no branch column", E::NAME),
            })
        };

        match E::SCOPE {
            Scope::Root => Ok(Vec::new()),
            Scope::Tenant => Ok(vec![(tenant_column()?, self.ctx.require_tenant(E::NAME)?)]),
            Scope::Branch => Ok(vec![
                (tenant_column()?, self.ctx.require_tenant(E::NAME)?),
                (branch_column()?, self.ctx.require_branch(E::NAME)?),
            ]),
        }
    }

    fn is_reserved(column: E::Column) -> bool {
        let name = column.as_str();
        std::iter::once(E::deleted_at_col())
            .chain(E::tenant_col())
            .chain(E::branch_col())
            .any(|reserved| reserved.as_str() == name)
    }

    /// Builds the full scoped condition for `filter`.
    ///
    /// # Errors
    /// Returns [`Error::MissingScopeContext`] when the entity is tenant- or
    /// branch-scoped and the context lacks the identifier.
    pub fn condition(&self, filter: Filter<E>) -> Result<Condition> {
        let scope = self.scope_values()?;

        let mut condition = Condition::all();
        for (column, expr) in filter.clauses {
            if Self::is_reserved(column) {
                warn!(
                    entity = E::NAME,
                    column = column.as_str(),
                    "Dropping caller-supplied scope filter"
                );
                continue;
            }
            condition = condition.add(expr);
        }

        condition = condition.add(E::deleted_at_col().is_null());
        for (column, value) in scope {
            condition = condition.add(column.eq(value));
        }
        Ok(condition)
    }

    /// A scoped `SELECT` that callers may order, limit or paginate further.
    ///
    /// # Errors
    /// Returns [`Error::MissingScopeContext`] when the scope is incomplete.
    pub fn select(&self, filter: Filter<E>) -> Result<Select<E>> {
        let condition = self.condition(filter)?;
        debug!(entity = E::NAME, ?condition, "Scoped select");
        Ok(E::find().filter(condition))
    }

    /// All rows matching `filter`.
    pub async fn find_many<C>(&self, conn: &C, filter: Filter<E>) -> Result<Vec<E::Model>>
    where
        C: ConnectionTrait,
    {
        self.select(filter)?.all(conn).await.map_err(Into::into)
    }

    /// First row matching `filter`.
    pub async fn find_one<C>(&self, conn: &C, filter: Filter<E>) -> Result<Option<E::Model>>
    where
        C: ConnectionTrait,
    {
        self.select(filter)?.one(conn).await.map_err(Into::into)
    }

    /// Row with the given id, if it is visible in this scope.
    pub async fn find_by_id<C>(&self, conn: &C, id: Uuid) -> Result<Option<E::Model>>
    where
        C: ConnectionTrait,
    {
        self.find_one(conn, Filter::by_id(id)).await
    }

    /// Row with the given id.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when the row is absent, soft-deleted or
    /// outside the scope.
    pub async fn get<C>(&self, conn: &C, id: Uuid) -> Result<E::Model>
    where
        C: ConnectionTrait,
    {
        self.find_by_id(conn, id)
            .await?
            .ok_or_else(|| Error::not_found(E::NAME, id))
    }

    /// Number of rows matching `filter`.
    pub async fn count<C>(&self, conn: &C, filter: Filter<E>) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        self.select(filter)?.count(conn).await.map_err(Into::into)
    }

    /// `SUM(column)` over the rows matching `filter`; `None` when no row matches.
    pub async fn sum<C, T>(
        &self,
        conn: &C,
        filter: Filter<E>,
        column: E::Column,
    ) -> Result<Option<T>>
    where
        C: ConnectionTrait,
        T: TryGetable + Send,
    {
        let sum = self
            .select(filter)?
            .select_only()
            .column_as(Expr::col((E::default(), column)).sum(), "aggregate")
            .into_tuple::<Option<T>>()
            .one(conn)
            .await?;
        Ok(sum.flatten())
    }

    /// A scoped bulk update; callers add `col_expr`s and execute it.
    ///
    /// Soft-deleted rows never match.
    ///
    /// # Errors
    /// Returns [`Error::MissingScopeContext`] when the scope is incomplete.
    pub fn update_many(&self, filter: Filter<E>) -> Result<UpdateMany<E>> {
        Ok(E::update_many().filter(self.condition(filter)?))
    }

    /// Forces the context's identifiers onto an active model, overwriting
    /// whatever the caller set.
    ///
    /// # Errors
    /// Returns [`Error::MissingScopeContext`] when the scope is incomplete.
    pub fn stamp<A>(&self, mut model: A) -> Result<A>
    where
        A: ActiveModelTrait<Entity = E>,
    {
        for (column, value) in self.scope_values()? {
            model.set(column, value.into());
        }
        Ok(model)
    }

    /// Inserts one row stamped with the scope.
    pub async fn insert<C, A>(&self, conn: &C, model: A) -> Result<E::Model>
    where
        C: ConnectionTrait,
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + 'static,
        E::Model: IntoActiveModel<A>,
    {
        let model = self.stamp(model)?;
        model.insert(conn).await.map_err(Into::into)
    }

    /// Inserts many rows stamped with the scope; returns the number written.
    pub async fn insert_many<C, A, I>(&self, conn: &C, models: I) -> Result<u64>
    where
        C: ConnectionTrait,
        A: ActiveModelTrait<Entity = E> + Send + 'static,
        E::Model: IntoActiveModel<A>,
        I: IntoIterator<Item = A>,
    {
        let models = models
            .into_iter()
            .map(|model| self.stamp(model))
            .collect::<Result<Vec<_>>>()?;
        if models.is_empty() {
            return Ok(0);
        }
        E::insert_many(models)
            .exec_without_returning(conn)
            .await
            .map_err(Into::into)
    }

    /// Soft-deletes one row. Deleting an already deleted row is a no-op.
    pub async fn delete<C>(&self, conn: &C, id: Uuid) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        self.delete_many(conn, Filter::by_id(id)).await
    }

    /// Soft-deletes every row matching `filter` by stamping `deleted_at`.
    ///
    /// Rows that are already deleted keep their original timestamp.
    pub async fn delete_many<C>(&self, conn: &C, filter: Filter<E>) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        let result = self
            .update_many(filter)?
            .col_expr(E::deleted_at_col(), Expr::value(Utc::now()))
            .exec(conn)
            .await?;
        debug!(
            entity = E::NAME,
            rows = result.rows_affected,
            "Soft-deleted rows"
        );
        Ok(result.rows_affected)
    }
}
