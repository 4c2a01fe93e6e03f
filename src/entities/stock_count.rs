use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Physical stock-count audit lifecycle. `cancelled` is reachable from any
/// non-terminal status; `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockCountStatus {
    Scheduled,
    InProgress,
    PendingReview,
    Approved,
    Completed,
    Cancelled,
}

impl StockCountStatus {
    pub const ALL: [StockCountStatus; 6] = [
        StockCountStatus::Scheduled,
        StockCountStatus::InProgress,
        StockCountStatus::PendingReview,
        StockCountStatus::Approved,
        StockCountStatus::Completed,
        StockCountStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StockCountStatus::Scheduled => "scheduled",
            StockCountStatus::InProgress => "in_progress",
            StockCountStatus::PendingReview => "pending_review",
            StockCountStatus::Approved => "approved",
            StockCountStatus::Completed => "completed",
            StockCountStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(StockCountStatus::Scheduled),
            "in_progress" => Some(StockCountStatus::InProgress),
            "pending_review" => Some(StockCountStatus::PendingReview),
            "approved" => Some(StockCountStatus::Approved),
            "completed" => Some(StockCountStatus::Completed),
            "cancelled" => Some(StockCountStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StockCountStatus::Completed | StockCountStatus::Cancelled)
    }

    pub fn allowed_targets(&self) -> &'static [StockCountStatus] {
        use StockCountStatus::*;
        match self {
            Scheduled => &[InProgress, Cancelled],
            InProgress => &[PendingReview, Cancelled],
            PendingReview => &[Approved, Cancelled],
            Approved => &[Completed, Cancelled],
            Completed => &[],
            Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, to: StockCountStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// Items can only be recorded while the count is still being taken.
    pub fn accepts_items(&self) -> bool {
        matches!(self, StockCountStatus::Scheduled | StockCountStatus::InProgress)
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_counts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub count_number: String,
    pub warehouse_id: Uuid,
    pub status: String,
    pub count_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub approved_by: Option<Uuid>,
    pub adjusted_by: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Denormalized aggregates, recomputed from the child rows inside the
    /// same transaction as every child write.
    pub total_items: i32,
    pub discrepancies: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_value_difference: Decimal,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn count_status(&self) -> Option<StockCountStatus> {
        StockCountStatus::from_str(&self.status)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::warehouse::Entity",
        from = "Column::WarehouseId",
        to = "super::warehouse::Column::Id"
    )]
    Warehouse,
    #[sea_orm(has_many = "super::stock_count_item::Entity")]
    Items,
}

impl Related<super::warehouse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Warehouse.def()
    }
}

impl Related<super::stock_count_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
