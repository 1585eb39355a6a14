//! Read side of orders: filtered listing, table bills and the kitchen queue view.

use crate::{
    core::{
        notify::PlacedOrder,
        pricing::round_money,
        repository::{Filter, ScopedRepository},
        scope::ScopeContext,
    },
    entities::{OrderStatus, dining_table, order, order_item},
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, PaginatorTrait, QueryOrder, sea_query::Expr};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Inclusive range of UTC calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateSpan {
    /// A single day.
    #[must_use]
    pub const fn day(day: NaiveDate) -> Self {
        Self { from: day, to: day }
    }

    /// Days `from..=to`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDateRange`] when `to` precedes `from`.
    pub fn range(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if to < from {
            return Err(Error::InvalidDateRange {
                message: format!("{to} is before {from}"),
            });
        }
        Ok(Self { from, to })
    }

    /// Half-open timestamp bounds `[start, end)`.
    fn bounds(self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let end_day = self.to.succ_opt().ok_or_else(|| Error::InvalidDateRange {
            message: format!("{} has no following day", self.to),
        })?;
        let midnight = |day: NaiveDate| Utc.from_utc_datetime(&day.and_time(NaiveTime::default()));
        Ok((midnight(self.from), midnight(end_day)))
    }
}

/// Criteria for [`OrderQueries::filter_orders`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderFilter {
    /// Creation days to include
    pub dates: Option<DateSpan>,
    /// Statuses to include; empty means all
    pub statuses: Vec<OrderStatus>,
    /// Paid flag to match
    pub paid: Option<bool>,
    /// Tables to include; empty means all
    pub table_ids: Vec<Uuid>,
    /// Exact order number
    pub order_number: Option<i64>,
    /// 1-based page
    pub page: u64,
    /// Rows per page
    pub page_size: u64,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            dates: None,
            statuses: Vec::new(),
            paid: None,
            table_ids: Vec::new(),
            order_number: None,
            page: 1,
            page_size: 20,
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    /// Rows of this page
    pub data: Vec<T>,
    /// Rows across all pages
    pub total: u64,
    /// 1-based page number
    pub page: u64,
    /// Requested page size
    pub page_size: u64,
    /// Number of pages
    pub total_pages: u64,
}

/// Amounts owed by a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableBill {
    /// Sum of unpaid subtotals
    pub sub_total: Decimal,
    /// Sum of unpaid tax
    pub tax: Decimal,
    /// Sum of unpaid totals
    pub total: Decimal,
    /// Portions ordered
    pub quantity: i64,
}

/// Open, not yet completed orders of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableOverview {
    /// Sum of their totals
    pub total: Decimal,
    /// Portions ordered
    pub quantity: i64,
    /// Whether any unpaid order is open
    pub has_unpaid_orders: bool,
}

/// Scoped order queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderQueries;

impl OrderQueries {
    /// Lists orders newest first, one page at a time.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPagination`] when `page` or `page_size` is zero.
    #[instrument(skip(conn))]
    pub async fn filter_orders<C>(
        conn: &C,
        ctx: &ScopeContext,
        filter: OrderFilter,
    ) -> Result<Page<order::Model>>
    where
        C: ConnectionTrait,
    {
        if filter.page == 0 || filter.page_size == 0 {
            return Err(Error::InvalidPagination {
                page: filter.page,
                page_size: filter.page_size,
            });
        }

        let mut clauses = Filter::<order::Entity>::new()
            .and_some(order::Column::Paid, filter.paid, |c, paid| c.eq(paid))
            .and_some(order::Column::OrderNumber, filter.order_number, |c, n| c.eq(n));
        if let Some(span) = filter.dates {
            let (start, end) = span.bounds()?;
            clauses = clauses
                .and(order::Column::CreatedAt, |c| c.gte(start))
                .and(order::Column::CreatedAt, |c| c.lt(end));
        }
        if !filter.statuses.is_empty() {
            clauses = clauses.and(order::Column::Status, |c| {
                c.is_in(filter.statuses.iter().copied())
            });
        }
        if !filter.table_ids.is_empty() {
            clauses = clauses.and(order::Column::TableId, |c| {
                c.is_in(filter.table_ids.iter().copied())
            });
        }

        let paginator = ScopedRepository::<order::Entity>::new(*ctx)
            .select(clauses)?
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::OrderNumber)
            .paginate(conn, filter.page_size);
        let total = paginator.num_items().await?;
        let data = paginator.fetch_page(filter.page - 1).await?;
        debug!(total, returned = data.len(), "Filtered orders");

        Ok(Page {
            data,
            total,
            page: filter.page,
            page_size: filter.page_size,
            total_pages: total.div_ceil(filter.page_size),
        })
    }

    /// An order with its lines.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when the order is not visible in `ctx`.
    pub async fn find_order<C>(conn: &C, ctx: &ScopeContext, order_id: Uuid) -> Result<PlacedOrder>
    where
        C: ConnectionTrait,
    {
        let order = ScopedRepository::<order::Entity>::new(*ctx)
            .get(conn, order_id)
            .await?;
        let items = ScopedRepository::<order_item::Entity>::new(*ctx)
            .select(Filter::on(order_item::Column::OrderId, |c| c.eq(order.id)))?
            .order_by_asc(order_item::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok(PlacedOrder { order, items })
    }

    /// Unpaid orders of a table in `status`, oldest first.
    pub async fn active_table_orders<C>(
        conn: &C,
        ctx: &ScopeContext,
        table_id: Uuid,
        status: OrderStatus,
    ) -> Result<Vec<order::Model>>
    where
        C: ConnectionTrait,
    {
        ScopedRepository::<order::Entity>::new(*ctx)
            .select(
                unpaid_at(table_id).and(order::Column::Status, |c| c.eq(status)),
            )?
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::OrderNumber)
            .all(conn)
            .await
            .map_err(Into::into)
    }

    /// Totals owed by a table across its unpaid orders.
    pub async fn table_bill<C>(conn: &C, ctx: &ScopeContext, table_id: Uuid) -> Result<TableBill>
    where
        C: ConnectionTrait,
    {
        let orders = ScopedRepository::<order::Entity>::new(*ctx);

        Ok(TableBill {
            sub_total: money_sum(conn, &orders, unpaid_at(table_id), order::Column::SubTotal)
                .await?,
            tax: money_sum(conn, &orders, unpaid_at(table_id), order::Column::Tax).await?,
            total: money_sum(conn, &orders, unpaid_at(table_id), order::Column::Total).await?,
            quantity: orders
                .sum::<_, i64>(conn, unpaid_at(table_id), order::Column::Quantity)
                .await?
                .unwrap_or_default(),
        })
    }

    /// Totals of the table's open orders still on their way from the kitchen.
    pub async fn table_overview<C>(
        conn: &C,
        ctx: &ScopeContext,
        table_id: Uuid,
    ) -> Result<TableOverview>
    where
        C: ConnectionTrait,
    {
        let orders = ScopedRepository::<order::Entity>::new(*ctx);
        let open = || {
            unpaid_at(table_id).and(order::Column::Status, |c| c.ne(OrderStatus::Completed))
        };

        let count = orders.count(conn, open()).await?;
        let total = money_sum(conn, &orders, open(), order::Column::Total).await?;
        let quantity = orders
            .sum::<_, i64>(conn, open(), order::Column::Quantity)
            .await?
            .unwrap_or_default();

        Ok(TableOverview {
            total,
            quantity,
            has_unpaid_orders: count > 0,
        })
    }

    /// Marks every order of a table whose flag differs as `paid`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when the table is not visible in `ctx`.
    #[instrument(skip(conn))]
    pub async fn set_table_paid<C>(
        conn: &C,
        ctx: &ScopeContext,
        table_id: Uuid,
        paid: bool,
    ) -> Result<u64>
    where
        C: ConnectionTrait,
    {
        ScopedRepository::<dining_table::Entity>::new(*ctx)
            .get(conn, table_id)
            .await?;

        let updated = ScopedRepository::<order::Entity>::new(*ctx)
            .update_many(
                Filter::on(order::Column::TableId, |c| c.eq(table_id))
                    .and(order::Column::Paid, |c| c.ne(paid)),
            )?
            .col_expr(order::Column::Paid, Expr::value(paid))
            .exec(conn)
            .await?;
        info!(%table_id, paid, rows = updated.rows_affected, "Table payment status updated");
        Ok(updated.rows_affected)
    }
}

/// Sums a money column; stores without a decimal type hand back binary
/// floats, so the sum is rounded to cents again.
async fn money_sum<C>(
    conn: &C,
    orders: &ScopedRepository<order::Entity>,
    filter: Filter<order::Entity>,
    column: order::Column,
) -> Result<Decimal>
where
    C: ConnectionTrait,
{
    let sum: Option<Decimal> = orders.sum(conn, filter, column).await?;
    Ok(round_money(sum.unwrap_or_default()))
}

fn unpaid_at(table_id: Uuid) -> Filter<order::Entity> {
    Filter::on(order::Column::TableId, |c| c.eq(table_id))
        .and(order::Column::Paid, |c| c.eq(false))
}
