//! Unified error type for the ordering core.
//!
//! Every fallible operation returns [`Result`]. Variants carry enough context
//! for the request boundary to pick a status code without string matching.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// All errors raised by the ordering core.
#[derive(Debug, Error)]
pub enum Error {
    /// A tenant- or branch-scoped entity was touched without the matching identifier.
    #[error("Missing scope context: {entity} requires {field}")]
    MissingScopeContext {
        /// Table of the entity that was accessed
        entity: &'static str,
        /// Scope field that was absent (`tenant_id` or `branch_id`)
        field: &'static str,
    },

    /// A scope header was present but not a valid UUID.
    #[error("Invalid scope header {header}: {value:?}")]
    InvalidScopeHeader {
        /// Header name
        header: &'static str,
        /// Raw header value
        value: String,
    },

    /// The requested row does not exist inside the caller's scope.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Table of the missing entity
        entity: &'static str,
        /// Identifier that was looked up
        id: Uuid,
    },

    /// One or more order lines reference out-of-stock price variants.
    #[error("One or more items in the order are out of stock: {price_ids:?}")]
    StockUnavailable {
        /// Variants that are currently out of stock
        price_ids: Vec<Uuid>,
    },

    /// Another transaction claimed the same order number first.
    #[error("Order number conflict in branch {branch_id}")]
    ConflictingOrderNumber {
        /// Branch whose counter was contended
        branch_id: Uuid,
    },

    /// A transaction could not start or finish within its configured bound.
    #[error("Transaction timed out during {stage} after {waited:?}")]
    TransactionTimeout {
        /// `begin` when waiting for a connection, `lock` when another
        /// transaction held the database, `execute` when running
        stage: &'static str,
        /// The bound that was exceeded
        waited: Duration,
    },

    /// The strict transition policy rejected a status change.
    #[error("Invalid order status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// An order was submitted without lines.
    #[error("An order needs at least one line")]
    EmptyOrder,

    /// An order line quantity was zero or negative.
    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity {
        /// The rejected quantity
        quantity: i32,
    },

    /// The customer is outside the branch's ordering radius.
    #[error("Order placed {distance_m:.0}m from the branch, allowed radius is {radius_m:.0}m")]
    OutsideOrderRadius {
        /// Distance between customer and branch in metres
        distance_m: f64,
        /// Allowed radius in metres
        radius_m: f64,
    },

    /// A table cannot be removed while unpaid orders reference it.
    #[error("Table {table_id} still has unpaid orders")]
    TableHasUnpaidOrders {
        /// Table that was about to be removed
        table_id: Uuid,
    },

    /// A reorder request did not cover exactly the active items of a category.
    #[error("Invalid menu positions for category {category_id}: {message}")]
    InvalidPositions {
        /// Category being reordered
        category_id: Uuid,
        /// What was wrong with the request
        message: String,
    },

    /// Page numbers and page sizes start at 1.
    #[error("Invalid pagination: page {page}, page size {page_size}")]
    InvalidPagination {
        /// Requested page
        page: u64,
        /// Requested page size
        page_size: u64,
    },

    /// A date range ended before it started.
    #[error("Invalid date range: {message}")]
    InvalidDateRange {
        /// Description of the problem
        message: String,
    },

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// Underlying data store failure.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a [`Error::NotFound`] for the given table.
    #[must_use]
    pub const fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// Whether retrying the whole call may succeed.
    ///
    /// Retries are not idempotent: a retried `create_order` allocates a new
    /// order number.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConflictingOrderNumber { .. } | Self::TransactionTimeout { .. }
        )
    }

    /// Whether the call lost a race with a concurrent transaction and can be
    /// retried right away.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        match self {
            Self::ConflictingOrderNumber { .. } => true,
            Self::TransactionTimeout { stage, .. } => *stage == "lock",
            _ => false,
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let conflict = Error::ConflictingOrderNumber {
            branch_id: Uuid::nil(),
        };
        let timeout = Error::TransactionTimeout {
            stage: "begin",
            waited: Duration::from_secs(10),
        };
        assert!(conflict.is_retryable());
        assert!(timeout.is_retryable());

        assert!(!Error::EmptyOrder.is_retryable());
        assert!(
            !Error::StockUnavailable {
                price_ids: vec![Uuid::nil()]
            }
            .is_retryable()
        );
        assert!(!Error::not_found("orders", Uuid::nil()).is_retryable());
    }

    #[test]
    fn test_only_races_count_as_contention() {
        let locked = Error::TransactionTimeout {
            stage: "lock",
            waited: Duration::from_secs(10),
        };
        let slow = Error::TransactionTimeout {
            stage: "execute",
            waited: Duration::from_secs(10),
        };
        assert!(locked.is_contention());
        assert!(Error::ConflictingOrderNumber { branch_id: Uuid::nil() }.is_contention());
        assert!(!slow.is_contention());
        assert!(slow.is_retryable());
        assert!(!Error::EmptyOrder.is_contention());
    }

    #[test]
    fn test_not_found_message_names_entity() {
        let id = Uuid::new_v4();
        let message = Error::not_found("dining_tables", id).to_string();
        assert_eq!(message, format!("dining_tables not found: {id}"));
    }
}
