mod common;

use assert_matches::assert_matches;
use common::{dec, TestApp};
use repairhub_api::{
    entities::{
        stock_count::{self, StockCountStatus},
        stock_movement::MovementType,
    },
    errors::ServiceError,
    services::{
        inventory::NewMovement,
        stock_counts::{CountEntry, NewStockCount},
    },
};
use uuid::Uuid;

fn entry(item_id: Uuid, counted: i32) -> CountEntry {
    CountEntry {
        item_id,
        counted_quantity: counted,
        counted_by: None,
        notes: None,
    }
}

async fn new_count(app: &TestApp, warehouse_id: Uuid) -> stock_count::Model {
    app.services
        .stock_counts
        .create_count(NewStockCount {
            warehouse_id,
            count_date: None,
            notes: None,
            created_by: None,
        })
        .await
        .unwrap()
}

async fn advance(app: &TestApp, count_id: Uuid, to: StockCountStatus) -> stock_count::Model {
    app.services
        .stock_counts
        .advance(count_id, to, Some(Uuid::new_v4()))
        .await
        .unwrap()
}

#[tokio::test]
async fn recording_items_freezes_the_snapshot_and_keeps_aggregates_current() {
    let app = TestApp::new().await;
    let wh = app.seed_warehouse("MAIN").await;
    let screen = app.seed_item("SCREEN-001", 40, 90).await;
    let battery = app.seed_item("BATT-001", 20, 55).await;
    app.stock(screen.id, wh.id, 10).await;
    app.stock(battery.id, wh.id, 6).await;

    let count = new_count(&app, wh.id).await;
    assert_eq!(count.count_status(), Some(StockCountStatus::Scheduled));

    let (count, row) = app
        .services
        .stock_counts
        .record_count_item(count.id, entry(screen.id, 8))
        .await
        .unwrap();
    assert_eq!(row.system_quantity, 10);
    assert_eq!(row.variance, -2);
    assert_eq!(count.total_items, 1);
    assert_eq!(count.discrepancies, 1);
    assert_eq!(count.total_value_difference, dec(-80)); // -2 × cost 40

    // Stock moves after the snapshot; re-entry keeps the frozen baseline.
    app.stock(screen.id, wh.id, 5).await;
    let (count, row) = app
        .services
        .stock_counts
        .record_count_item(count.id, entry(screen.id, 10))
        .await
        .unwrap();
    assert_eq!(row.system_quantity, 10);
    assert_eq!(row.variance, 0);
    assert_eq!(count.discrepancies, 0);

    let (count, row) = app
        .services
        .stock_counts
        .record_count_item(count.id, entry(battery.id, 6))
        .await
        .unwrap();
    assert_eq!(row.variance, 0);
    assert_eq!(count.total_items, 2);
}

#[tokio::test]
async fn items_are_only_accepted_while_the_count_is_open() {
    let app = TestApp::new().await;
    let wh = app.seed_warehouse("MAIN").await;
    let item = app.seed_item("CASE-001", 10, 30).await;

    let count = new_count(&app, wh.id).await;
    advance(&app, count.id, StockCountStatus::InProgress).await;
    advance(&app, count.id, StockCountStatus::PendingReview).await;

    let err = app
        .services
        .stock_counts
        .record_count_item(count.id, entry(item.id, 4))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(_));
}

#[tokio::test]
async fn completion_adjusts_every_discrepancy_through_the_ledger() {
    let app = TestApp::new().await;
    let wh = app.seed_warehouse("MAIN").await;
    let screen = app.seed_item("SCREEN-001", 40, 90).await;
    let battery = app.seed_item("BATT-001", 20, 55).await;
    app.stock(screen.id, wh.id, 10).await;
    app.stock(battery.id, wh.id, 6).await;

    let count = new_count(&app, wh.id).await;
    let svc = &app.services.stock_counts;
    svc.record_count_item(count.id, entry(screen.id, 7)).await.unwrap();
    svc.record_count_item(count.id, entry(battery.id, 9)).await.unwrap();

    let count = advance(&app, count.id, StockCountStatus::InProgress).await;
    assert!(count.started_at.is_some());
    let count = advance(&app, count.id, StockCountStatus::PendingReview).await;
    assert!(count.reviewed_by.is_some());
    let count = advance(&app, count.id, StockCountStatus::Approved).await;
    assert!(count.approved_by.is_some());

    let count = advance(&app, count.id, StockCountStatus::Completed).await;
    assert_eq!(count.count_status(), Some(StockCountStatus::Completed));
    assert!(count.completed_at.is_some());
    assert!(count.adjusted_by.is_some());

    // Levels now match the physical count.
    assert_eq!(app.level_quantity(screen.id, wh.id).await, 7);
    assert_eq!(app.level_quantity(battery.id, wh.id).await, 9);

    // One adjustment movement per discrepancy, referencing the count.
    let (movements, _) = app
        .services
        .inventory
        .list_movements(screen.id, wh.id, 1, 20)
        .await
        .unwrap();
    let adjustment = movements
        .iter()
        .find(|m| m.movement_type == MovementType::Adjustment.as_str())
        .expect("missing adjustment movement");
    assert_eq!(adjustment.quantity, -3);
    assert_eq!(adjustment.reference_id, Some(count.id));
}

#[tokio::test]
async fn stale_snapshots_abort_completion_wholesale() {
    let app = TestApp::new().await;
    let wh = app.seed_warehouse("MAIN").await;
    let screen = app.seed_item("SCREEN-001", 40, 90).await;
    let battery = app.seed_item("BATT-001", 20, 55).await;
    app.stock(screen.id, wh.id, 10).await;
    app.stock(battery.id, wh.id, 6).await;

    let count = new_count(&app, wh.id).await;
    let svc = &app.services.stock_counts;
    svc.record_count_item(count.id, entry(screen.id, 8)).await.unwrap();
    svc.record_count_item(count.id, entry(battery.id, 5)).await.unwrap();

    advance(&app, count.id, StockCountStatus::InProgress).await;
    advance(&app, count.id, StockCountStatus::PendingReview).await;
    advance(&app, count.id, StockCountStatus::Approved).await;

    // Stock moves between approval and completion.
    app.services
        .inventory
        .post_movement(NewMovement {
            item_id: battery.id,
            warehouse_id: wh.id,
            quantity: -2,
            movement_type: MovementType::Out,
            reason: None,
            reference: None,
            performed_by: None,
        })
        .await
        .unwrap();

    let err = app
        .services
        .stock_counts
        .advance(count.id, StockCountStatus::Completed, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(msg) => {
        assert!(msg.contains("recount"));
    });

    // Nothing was adjusted: both levels untouched, count still approved.
    assert_eq!(app.level_quantity(screen.id, wh.id).await, 10);
    assert_eq!(app.level_quantity(battery.id, wh.id).await, 4);
    let (count, _) = app.services.stock_counts.get_count(count.id).await.unwrap();
    assert_eq!(count.count_status(), Some(StockCountStatus::Approved));
}

#[tokio::test]
async fn the_transition_table_gates_every_advance() {
    let app = TestApp::new().await;
    let wh = app.seed_warehouse("MAIN").await;
    let count = new_count(&app, wh.id).await;

    let err = app
        .services
        .stock_counts
        .advance(count.id, StockCountStatus::Approved, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));

    let count = advance(&app, count.id, StockCountStatus::Cancelled).await;
    assert_eq!(count.count_status(), Some(StockCountStatus::Cancelled));

    let err = app
        .services
        .stock_counts
        .advance(count.id, StockCountStatus::InProgress, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}
