pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Json, Router};
use sea_orm::DatabaseConnection;
use serde_json::json;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::{
    inventory::InventoryService, invoicing::InvoicingService,
    purchase_orders::PurchaseOrderService, repair_orders::RepairOrderService,
    stock_counts::StockCountService, workflow::WorkflowService,
};

/// One instance of every domain service, sharing the pool, the event
/// channel and (through `InventoryService`) the stock-level lock registry.
#[derive(Clone)]
pub struct AppServices {
    pub inventory: InventoryService,
    pub repair_orders: RepairOrderService,
    pub stock_counts: StockCountService,
    pub invoicing: InvoicingService,
    pub purchase_orders: PurchaseOrderService,
    pub workflow: WorkflowService,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        lock_wait: Duration,
    ) -> Self {
        let inventory = InventoryService::new(db.clone(), event_sender.clone(), lock_wait);
        Self {
            repair_orders: RepairOrderService::new(db.clone(), event_sender.clone()),
            stock_counts: StockCountService::new(
                db.clone(),
                inventory.clone(),
                event_sender.clone(),
            ),
            invoicing: InvoicingService::new(db.clone(), event_sender.clone(), lock_wait),
            purchase_orders: PurchaseOrderService::new(
                db.clone(),
                inventory.clone(),
                event_sender.clone(),
            ),
            workflow: WorkflowService::new(db, inventory.clone(), event_sender),
            inventory,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub event_sender: EventSender,
    pub services: AppServices,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: AppConfig, event_sender: EventSender) -> Self {
        let services = AppServices::new(db.clone(), event_sender.clone(), config.lock_wait());
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Full application router: `/health` plus one subtree per component under
/// `/api/v1`.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/inventory", handlers::inventory::router())
        .nest("/api/v1/repair-orders", handlers::repair_orders::router())
        .nest("/api/v1/stock-counts", handlers::stock_counts::router())
        .nest("/api/v1/invoices", handlers::invoices::router())
        .nest("/api/v1/purchase-orders", handlers::purchase_orders::router())
        .with_state(state)
}
