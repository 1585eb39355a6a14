//! Entity module - Contains all SeaORM entity definitions for the database.
//! Each entity has a Model struct for data and an Entity struct for operations.
//! Scope classification for each entity lives in [`crate::core::scope`].

pub mod branch;
pub mod dining_table;
pub mod menu_item;
pub mod menu_item_price;
pub mod order;
pub mod order_item;
pub mod order_number_counter;
pub mod tenant;

// Re-export specific types to avoid conflicts
pub use branch::{Column as BranchColumn, Entity as Branch, Model as BranchModel};
pub use dining_table::{
    Column as DiningTableColumn, Entity as DiningTable, Model as DiningTableModel,
};
pub use menu_item::{Column as MenuItemColumn, Entity as MenuItem, Model as MenuItemModel};
pub use menu_item_price::{
    Column as MenuItemPriceColumn, Entity as MenuItemPrice, Model as MenuItemPriceModel,
};
pub use order::{
    Column as OrderColumn, Entity as Order, Model as OrderModel, OrderStatus, OrderType,
};
pub use order_item::{Column as OrderItemColumn, Entity as OrderItem, Model as OrderItemModel};
pub use order_number_counter::{
    Column as OrderNumberCounterColumn, Entity as OrderNumberCounter,
    Model as OrderNumberCounterModel,
};
pub use tenant::{Column as TenantColumn, Entity as Tenant, Model as TenantModel};
