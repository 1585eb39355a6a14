//! Order pricing with fixed-point decimals.
//!
//! Line totals are `unit_price * quantity` rounded to cents. The subtotal is
//! the sum of rounded lines, tax is `subtotal * tax_rate` rounded to cents, and
//! `total = subtotal + tax`. Rounding is half away from zero (half-up for the
//! non-negative amounts priced here). `f64` never enters the arithmetic.

use crate::{
    core::{
        repository::{Filter, ScopedRepository},
        scope::ScopeContext,
        stock::StockConsistencyService,
    },
    entities::{menu_item, menu_item_price},
    errors::{Error, Result},
};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Fractional digits kept for every monetary amount.
pub const MONEY_SCALE: u32 = 2;

/// Rounds a monetary amount to cents, half away from zero.
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// One requested order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Menu item being ordered
    pub item_id: Uuid,
    /// Price variant of that item
    pub price_id: Uuid,
    /// Number of portions
    pub quantity: i32,
    /// Free-form kitchen notes
    #[serde(default)]
    pub special_instructions: String,
}

impl OrderLine {
    /// A line without special instructions.
    #[must_use]
    pub const fn new(item_id: Uuid, price_id: Uuid, quantity: i32) -> Self {
        Self {
            item_id,
            price_id,
            quantity,
            special_instructions: String::new(),
        }
    }
}

/// A line with its resolved unit price and rounded total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    /// The requested line
    pub line: OrderLine,
    /// Variant price at the time of ordering
    pub unit_price: Decimal,
    /// `unit_price * quantity`, rounded
    pub total: Decimal,
}

/// Aggregate result of pricing an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedOrder {
    /// Per-line decomposition, in request order
    pub lines: Vec<PricedLine>,
    /// Sum of line totals
    pub sub_total: Decimal,
    /// Tax on the subtotal
    pub tax: Decimal,
    /// `sub_total + tax`
    pub total: Decimal,
    /// Sum of line quantities
    pub quantity: i32,
}

/// Prices order lines against the current menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingEngine {
    tax_rate: Decimal,
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new(Decimal::new(10, 2))
    }
}

impl PricingEngine {
    /// Creates an engine with a flat tax rate (`0.10` for 10%).
    #[must_use]
    pub const fn new(tax_rate: Decimal) -> Self {
        Self { tax_rate }
    }

    /// The flat tax rate applied to subtotals.
    #[must_use]
    pub const fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    /// Pure pricing of lines whose unit prices are already known.
    ///
    /// # Errors
    /// Returns [`Error::EmptyOrder`] without lines and
    /// [`Error::InvalidQuantity`] for non-positive or overflowing quantities.
    pub fn compute(&self, lines: Vec<(OrderLine, Decimal)>) -> Result<PricedOrder> {
        if lines.is_empty() {
            return Err(Error::EmptyOrder);
        }

        let mut priced = Vec::with_capacity(lines.len());
        let mut sub_total = Decimal::ZERO;
        let mut quantity: i32 = 0;

        for (line, unit_price) in lines {
            if line.quantity <= 0 {
                return Err(Error::InvalidQuantity {
                    quantity: line.quantity,
                });
            }
            let overflow = || Error::InvalidQuantity {
                quantity: line.quantity,
            };

            let total = unit_price
                .checked_mul(Decimal::from(line.quantity))
                .map(round_money)
                .ok_or_else(overflow)?;
            sub_total = sub_total.checked_add(total).ok_or_else(overflow)?;
            quantity = quantity.checked_add(line.quantity).ok_or_else(overflow)?;

            priced.push(PricedLine {
                line,
                unit_price,
                total,
            });
        }

        let sub_total = round_money(sub_total);
        let tax = round_money(sub_total * self.tax_rate);
        let total = sub_total + tax;

        Ok(PricedOrder {
            lines: priced,
            sub_total,
            tax,
            total,
            quantity,
        })
    }

    /// Resolves unit prices for `lines` inside `ctx` and prices them.
    ///
    /// Read-only; run it on the order transaction so prices and stock flags
    /// are read from the same snapshot that is written.
    ///
    /// # Errors
    /// - [`Error::EmptyOrder`] / [`Error::InvalidQuantity`] for malformed lines
    /// - [`Error::NotFound`] when an item is outside the scope or a variant
    ///   does not belong to its item
    /// - [`Error::StockUnavailable`] when any referenced variant is out of stock
    pub async fn price<C>(
        &self,
        conn: &C,
        ctx: &ScopeContext,
        lines: Vec<OrderLine>,
    ) -> Result<PricedOrder>
    where
        C: ConnectionTrait,
    {
        if lines.is_empty() {
            return Err(Error::EmptyOrder);
        }
        if let Some(bad) = lines.iter().find(|line| line.quantity <= 0) {
            return Err(Error::InvalidQuantity {
                quantity: bad.quantity,
            });
        }

        let item_ids: Vec<Uuid> = lines.iter().map(|line| line.item_id).collect();
        let price_ids: Vec<Uuid> = lines.iter().map(|line| line.price_id).collect();

        let items = ScopedRepository::<menu_item::Entity>::new(*ctx)
            .find_many(
                conn,
                Filter::on(menu_item::Column::Id, |c| c.is_in(item_ids.iter().copied())),
            )
            .await?;
        let variants: HashMap<Uuid, menu_item_price::Model> =
            ScopedRepository::<menu_item_price::Entity>::new(ScopeContext::unscoped())
                .find_many(
                    conn,
                    Filter::on(menu_item_price::Column::Id, |c| {
                        c.is_in(price_ids.iter().copied())
                    }),
                )
                .await?
                .into_iter()
                .map(|variant| (variant.id, variant))
                .collect();

        let mut resolved = Vec::with_capacity(lines.len());
        for line in lines {
            if !items.iter().any(|item| item.id == line.item_id) {
                return Err(Error::not_found("menu_items", line.item_id));
            }
            let unit_price = variants
                .get(&line.price_id)
                .filter(|variant| variant.item_id == line.item_id)
                .map(|variant| variant.price)
                .ok_or_else(|| Error::not_found("menu_item_prices", line.price_id))?;
            resolved.push((line, unit_price));
        }

        let unavailable = StockConsistencyService::unavailable_variants(conn, &price_ids).await?;
        if !unavailable.is_empty() {
            debug!(?unavailable, "Rejecting order with out-of-stock lines");
            return Err(Error::StockUnavailable {
                price_ids: unavailable,
            });
        }

        self.compute(resolved)
    }
}
