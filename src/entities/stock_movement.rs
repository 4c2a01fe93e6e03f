use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction/kind of a stock movement. A transfer is stored as two coupled
/// rows (`transfer_out` at the source, `transfer_in` at the destination) so
/// a level can always be replayed as a plain signed sum per warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementType {
    In,
    Out,
    TransferIn,
    TransferOut,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
            MovementType::Adjustment => "adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in" => Some(MovementType::In),
            "out" => Some(MovementType::Out),
            "transfer_in" => Some(MovementType::TransferIn),
            "transfer_out" => Some(MovementType::TransferOut),
            "adjustment" => Some(MovementType::Adjustment),
            _ => None,
        }
    }
}

/// What a movement was posted on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceType {
    RepairOrder,
    PurchaseOrder,
    StockCount,
    Transfer,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::RepairOrder => "repair_order",
            ReferenceType::PurchaseOrder => "purchase_order",
            ReferenceType::StockCount => "stock_count",
            ReferenceType::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "repair_order" => Some(ReferenceType::RepairOrder),
            "purchase_order" => Some(ReferenceType::PurchaseOrder),
            "stock_count" => Some(ReferenceType::StockCount),
            "transfer" => Some(ReferenceType::Transfer),
            _ => None,
        }
    }
}

/// Append-only stock ledger row. Never updated or deleted after insert.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    /// Signed delta: positive for in/transfer_in, negative for
    /// out/transfer_out, either sign for adjustment.
    pub quantity: i32,
    pub movement_type: String,
    pub reason: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub performed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_item::Entity",
        from = "Column::ItemId",
        to = "super::inventory_item::Column::Id"
    )]
    InventoryItem,
    #[sea_orm(
        belongs_to = "super::warehouse::Entity",
        from = "Column::WarehouseId",
        to = "super::warehouse::Column::Id"
    )]
    Warehouse,
}

impl Related<super::inventory_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryItem.def()
    }
}

impl Related<super::warehouse::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Warehouse.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
