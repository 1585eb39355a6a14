//! Business logic - tenant/branch scoping and the order transaction engine.
//!
//! Nothing in here knows about transports. Every operation takes the database
//! connection and the request's [`scope::ScopeContext`] explicitly.

/// Bounded transactions: begin with a wait limit, run with a time limit, settle
pub mod atomic;
/// Haversine distance for the customer ordering radius
pub mod geo;
/// Menu items and their per-category positions
pub mod menu;
/// Post-commit order events and the branch broadcaster
pub mod notify;
/// Per-branch order number counters
pub mod order_number;
/// Order creation engine
pub mod orders;
/// Fixed-point order pricing
pub mod pricing;
/// Order listing, bills and table overviews
pub mod query;
/// Scope-enforcing, soft-deleting repository
pub mod repository;
/// Per-request scope context and entity classification
pub mod scope;
/// Order status state machine with queue promotion
pub mod status;
/// Item/variant stock consistency
pub mod stock;
/// Dining tables and their removal guard
pub mod tables;
