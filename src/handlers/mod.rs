pub mod common;
pub mod inventory;
pub mod invoices;
pub mod purchase_orders;
pub mod repair_orders;
pub mod stock_counts;

pub use crate::AppState;
