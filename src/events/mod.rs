//! Post-commit domain events.
//!
//! Services send events only after their transaction commits; delivery is
//! fire-and-forget (the notification collaborator is external), so a full
//! channel or closed receiver is logged and otherwise ignored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Stock ledger
    StockMovementPosted {
        movement_id: Uuid,
        item_id: Uuid,
        warehouse_id: Uuid,
        quantity: i32,
        movement_type: String,
        new_quantity: i32,
    },
    StockTransferred {
        item_id: Uuid,
        from_warehouse_id: Uuid,
        to_warehouse_id: Uuid,
        quantity: i32,
    },

    // Repair workflow
    RepairOrderCreated {
        repair_order_id: Uuid,
    },
    RepairStatusChanged {
        repair_order_id: Uuid,
        old_status: Option<String>,
        new_status: String,
    },
    RepairCompleted {
        repair_order_id: Uuid,
        parts_consumed: usize,
    },
    DeviceDelivered {
        repair_order_id: Uuid,
        delivered_by: Uuid,
    },

    // Stock counts
    StockCountCompleted {
        stock_count_id: Uuid,
        adjustments: usize,
    },

    // Invoicing
    InvoiceCreated {
        invoice_id: Uuid,
        repair_order_id: Uuid,
        total_amount: Decimal,
    },
    PaymentApplied {
        payment_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
        new_status: String,
    },
    PaymentRefunded {
        payment_id: Uuid,
        invoice_id: Uuid,
        amount: Decimal,
    },
    InvoiceVoided {
        invoice_id: Uuid,
    },

    // Purchasing
    PurchaseOrderApproved {
        purchase_order_id: Uuid,
        approved_by: Uuid,
    },
    PurchaseOrderRejected {
        purchase_order_id: Uuid,
        rejected_by: Uuid,
    },
    PurchaseOrderReceived {
        purchase_order_id: Uuid,
        lines: usize,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, failing if the channel is closed or full.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Post-commit notification: the transaction has already committed, so
    /// a delivery failure must not fail the operation.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("dropping domain event: {}", e);
        }
    }
}

/// Event loop consuming domain events. Outbound notification dispatch lives
/// with an external collaborator; this consumer records the stream for
/// operators.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "domain event");
    }
    info!("event channel closed; event processor exiting");
}
