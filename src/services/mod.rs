//! The workflow engine: one service per component, each owning its
//! transactional invariants. Services compose through crate-internal
//! helpers (`inventory::apply_movement`, `repair_orders::transition_in`)
//! so multi-component operations stay a single unit of work.

pub mod inventory;
pub mod invoicing;
pub mod purchase_orders;
pub mod repair_orders;
pub mod stock_counts;
pub mod workflow;

use uuid::Uuid;

/// Human-facing document numbers (RO-, INV-, SC-, PO-).
pub(crate) fn document_number(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8].to_uppercase())
}
