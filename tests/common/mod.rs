#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tokio::sync::mpsc;
use uuid::Uuid;

use repairhub_api::{
    db::{establish_connection, run_migrations},
    entities::{
        inventory_item::{self, ItemStatus},
        repair_order,
        stock_movement::MovementType,
        warehouse,
    },
    events::{self, EventSender},
    services::inventory::NewMovement,
    AppServices,
};

/// Test harness: in-memory sqlite with migrations applied and the full
/// service set wired to a drained event channel.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = Arc::new(
            establish_connection("sqlite::memory:")
                .await
                .expect("failed to open in-memory sqlite"),
        );
        run_migrations(&db).await.expect("failed to run migrations");

        let (tx, rx) = mpsc::channel(100);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(events::process_events(rx));

        let services = AppServices::new(db.clone(), event_sender, Duration::from_secs(5));
        Self {
            db,
            services,
            _event_task: event_task,
        }
    }

    pub async fn seed_item(
        &self,
        sku: &str,
        unit_cost: i64,
        unit_price: i64,
    ) -> inventory_item::Model {
        let now = Utc::now();
        inventory_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("{} test part", sku)),
            unit_cost: Set(dec(unit_cost)),
            unit_price: Set(dec(unit_price)),
            status: Set(ItemStatus::Active.as_str().to_string()),
            archived_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed item")
    }

    pub async fn seed_archived_item(&self, sku: &str) -> inventory_item::Model {
        let now = Utc::now();
        inventory_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            name: Set(format!("{} retired part", sku)),
            unit_cost: Set(dec(1)),
            unit_price: Set(dec(2)),
            status: Set(ItemStatus::Archived.as_str().to_string()),
            archived_at: Set(Some(now)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed archived item")
    }

    pub async fn seed_warehouse(&self, code: &str) -> warehouse::Model {
        let now = Utc::now();
        warehouse::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            name: Set(format!("{} warehouse", code)),
            status: Set(ItemStatus::Active.as_str().to_string()),
            archived_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("failed to seed warehouse")
    }

    /// Puts stock on hand through the ledger, as production code would.
    pub async fn stock(&self, item_id: Uuid, warehouse_id: Uuid, quantity: i32) {
        self.services
            .inventory
            .post_movement(NewMovement {
                item_id,
                warehouse_id,
                quantity,
                movement_type: MovementType::In,
                reason: Some("test stock".to_string()),
                reference: None,
                performed_by: None,
            })
            .await
            .expect("failed to seed stock");
    }

    pub async fn level_quantity(&self, item_id: Uuid, warehouse_id: Uuid) -> i32 {
        self.services
            .inventory
            .get_stock_level(item_id, warehouse_id)
            .await
            .expect("failed to read stock level")
            .map(|l| l.quantity)
            .unwrap_or(0)
    }

    pub async fn new_order(&self) -> repair_order::Model {
        self.services
            .repair_orders
            .create_order(repairhub_api::services::repair_orders::NewRepairOrder {
                customer_id: Uuid::new_v4(),
                device: "Laptop 13\"".to_string(),
                reported_problem: Some("does not boot".to_string()),
                created_by: None,
            })
            .await
            .expect("failed to create repair order")
    }

    /// A fresh repair order walked to `under_repair` via the walk-in path.
    pub async fn order_under_repair(&self) -> repair_order::Model {
        let order = self.new_order().await;
        self.services
            .repair_orders
            .start_repair(order.id, Uuid::new_v4(), None, None)
            .await
            .expect("failed to start repair")
    }

    /// A repair order finished with no parts, ready for invoicing.
    pub async fn order_completed(&self) -> repair_order::Model {
        let order = self.order_under_repair().await;
        self.services
            .workflow
            .complete_repair(order.id, dec(120), Vec::new(), None)
            .await
            .expect("failed to complete repair")
            .order
    }
}

/// Money helper matching the 19,4 column scale.
pub fn dec(value: i64) -> Decimal {
    Decimal::new(value * 10_000, 4)
}
