//! SeaORM entities for the repair-to-cash core.
//!
//! `stock_movements`, `payments` and `repair_status_logs` are append-only
//! ledgers; `stock_levels`, `invoices.amount_paid` and the stock-count
//! aggregates are caches derived from them and are only ever written in the
//! same transaction as the ledger row they summarize.

pub mod inventory_item;
pub mod warehouse;

pub mod stock_level;
pub mod stock_movement;

pub mod repair_order;
pub mod repair_status_log;

pub mod invoice;
pub mod invoice_line_item;
pub mod payment;

pub mod stock_count;
pub mod stock_count_item;

pub mod purchase_order;
pub mod purchase_order_item;
