use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Repair order lifecycle.
///
/// The happy path runs received → inspection → quotation_sent →
/// quotation_approved → under_repair (↔ waiting_parts) → completed →
/// invoiced → ready_for_delivery → delivered. `on_hold` is reachable from
/// every non-terminal status; `rejected` is reachable up to `completed`
/// (an invoiced order is voided, not rejected). Terminal: `delivered`,
/// `rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairStatus {
    Received,
    Inspection,
    QuotationSent,
    QuotationApproved,
    UnderRepair,
    WaitingParts,
    Completed,
    Invoiced,
    ReadyForDelivery,
    Delivered,
    Rejected,
    OnHold,
}

impl RepairStatus {
    pub const ALL: [RepairStatus; 12] = [
        RepairStatus::Received,
        RepairStatus::Inspection,
        RepairStatus::QuotationSent,
        RepairStatus::QuotationApproved,
        RepairStatus::UnderRepair,
        RepairStatus::WaitingParts,
        RepairStatus::Completed,
        RepairStatus::Invoiced,
        RepairStatus::ReadyForDelivery,
        RepairStatus::Delivered,
        RepairStatus::Rejected,
        RepairStatus::OnHold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStatus::Received => "received",
            RepairStatus::Inspection => "inspection",
            RepairStatus::QuotationSent => "quotation_sent",
            RepairStatus::QuotationApproved => "quotation_approved",
            RepairStatus::UnderRepair => "under_repair",
            RepairStatus::WaitingParts => "waiting_parts",
            RepairStatus::Completed => "completed",
            RepairStatus::Invoiced => "invoiced",
            RepairStatus::ReadyForDelivery => "ready_for_delivery",
            RepairStatus::Delivered => "delivered",
            RepairStatus::Rejected => "rejected",
            RepairStatus::OnHold => "on_hold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "received" => Some(RepairStatus::Received),
            "inspection" => Some(RepairStatus::Inspection),
            "quotation_sent" => Some(RepairStatus::QuotationSent),
            "quotation_approved" => Some(RepairStatus::QuotationApproved),
            "under_repair" => Some(RepairStatus::UnderRepair),
            "waiting_parts" => Some(RepairStatus::WaitingParts),
            "completed" => Some(RepairStatus::Completed),
            "invoiced" => Some(RepairStatus::Invoiced),
            "ready_for_delivery" => Some(RepairStatus::ReadyForDelivery),
            "delivered" => Some(RepairStatus::Delivered),
            "rejected" => Some(RepairStatus::Rejected),
            "on_hold" => Some(RepairStatus::OnHold),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RepairStatus::Delivered | RepairStatus::Rejected)
    }

    /// Allowed targets from this status. `under_repair` is reachable
    /// directly from `received` for walk-in jobs that skip the quotation
    /// step.
    pub fn allowed_targets(&self) -> &'static [RepairStatus] {
        use RepairStatus::*;
        match self {
            Received => &[Inspection, UnderRepair, Rejected, OnHold],
            Inspection => &[QuotationSent, Rejected, OnHold],
            QuotationSent => &[QuotationApproved, Rejected, OnHold],
            QuotationApproved => &[UnderRepair, Rejected, OnHold],
            UnderRepair => &[WaitingParts, Completed, Rejected, OnHold],
            WaitingParts => &[UnderRepair, Rejected, OnHold],
            Completed => &[Invoiced, Rejected, OnHold],
            Invoiced => &[ReadyForDelivery, OnHold],
            ReadyForDelivery => &[Delivered, OnHold],
            Delivered => &[],
            Rejected => &[],
            OnHold => &[
                Received,
                Inspection,
                QuotationSent,
                QuotationApproved,
                UnderRepair,
                WaitingParts,
                Completed,
                Invoiced,
                ReadyForDelivery,
                Rejected,
            ],
        }
    }

    pub fn can_transition_to(&self, to: RepairStatus) -> bool {
        self.allowed_targets().contains(&to)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repair_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub customer_id: Uuid,
    pub device: String,
    pub reported_problem: Option<String>,
    pub status: String,
    pub technician_id: Option<Uuid>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub estimated_cost: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub actual_cost: Option<Decimal>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub delivered_by: Option<Uuid>,
    pub delivery_signature: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn repair_status(&self) -> Option<RepairStatus> {
        RepairStatus::from_str(&self.status)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::repair_status_log::Entity")]
    StatusLogs,
    #[sea_orm(has_many = "super::invoice::Entity")]
    Invoices,
}

impl Related<super::repair_status_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusLogs.def()
    }
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoices.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
