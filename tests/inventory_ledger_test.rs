mod common;

use assert_matches::assert_matches;
use common::TestApp;
use repairhub_api::{
    entities::stock_movement::MovementType, errors::ServiceError,
    services::inventory::NewMovement,
};

fn movement(
    item_id: uuid::Uuid,
    warehouse_id: uuid::Uuid,
    quantity: i32,
    movement_type: MovementType,
) -> NewMovement {
    NewMovement {
        item_id,
        warehouse_id,
        quantity,
        movement_type,
        reason: None,
        reference: None,
        performed_by: None,
    }
}

#[tokio::test]
async fn level_is_created_at_zero_and_tracks_the_ledger() {
    let app = TestApp::new().await;
    let item = app.seed_item("SCREEN-001", 40, 90).await;
    let wh = app.seed_warehouse("MAIN").await;

    assert_eq!(app.level_quantity(item.id, wh.id).await, 0);

    let posted = app
        .services
        .inventory
        .post_movement(movement(item.id, wh.id, 25, MovementType::In))
        .await
        .unwrap();
    assert_eq!(posted.level.quantity, 25);
    assert_eq!(posted.movement.quantity, 25);

    let posted = app
        .services
        .inventory
        .post_movement(movement(item.id, wh.id, -10, MovementType::Out))
        .await
        .unwrap();
    assert_eq!(posted.level.quantity, 15);

    let (movements, total) = app
        .services
        .inventory
        .list_movements(item.id, wh.id, 1, 20)
        .await
        .unwrap();
    assert_eq!(total, 2);
    let sum: i32 = movements.iter().map(|m| m.quantity).sum();
    assert_eq!(sum, app.level_quantity(item.id, wh.id).await);
}

#[tokio::test]
async fn ledger_never_goes_negative() {
    let app = TestApp::new().await;
    let item = app.seed_item("BATT-001", 20, 55).await;
    let wh = app.seed_warehouse("MAIN").await;
    app.stock(item.id, wh.id, 5).await;

    let err = app
        .services
        .inventory
        .post_movement(movement(item.id, wh.id, -6, MovementType::Out))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(msg) => {
        assert!(msg.contains("have 5"));
        assert!(msg.contains("need 6"));
    });

    // The rejected write left nothing behind.
    assert_eq!(app.level_quantity(item.id, wh.id).await, 5);
    let (_, total) = app
        .services
        .inventory
        .list_movements(item.id, wh.id, 1, 20)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn signed_delta_discipline_is_enforced() {
    let app = TestApp::new().await;
    let item = app.seed_item("CASE-001", 10, 30).await;
    let wh = app.seed_warehouse("MAIN").await;

    let err = app
        .services
        .inventory
        .post_movement(movement(item.id, wh.id, 0, MovementType::Adjustment))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .inventory
        .post_movement(movement(item.id, wh.id, -3, MovementType::In))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .inventory
        .post_movement(movement(item.id, wh.id, 3, MovementType::Out))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn archived_items_cannot_move_stock() {
    let app = TestApp::new().await;
    let item = app.seed_archived_item("OLD-001").await;
    let wh = app.seed_warehouse("MAIN").await;

    let err = app
        .services
        .inventory
        .post_movement(movement(item.id, wh.id, 5, MovementType::In))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) => {
        assert!(msg.contains("archived"));
    });
}

#[tokio::test]
async fn unknown_item_and_warehouse_are_not_found() {
    let app = TestApp::new().await;
    let item = app.seed_item("FAN-001", 8, 20).await;
    let wh = app.seed_warehouse("MAIN").await;

    let err = app
        .services
        .inventory
        .post_movement(movement(uuid::Uuid::new_v4(), wh.id, 5, MovementType::In))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let err = app
        .services
        .inventory
        .post_movement(movement(item.id, uuid::Uuid::new_v4(), 5, MovementType::In))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn transfer_moves_stock_between_warehouses_atomically() {
    let app = TestApp::new().await;
    let item = app.seed_item("SSD-001", 60, 140).await;
    let main = app.seed_warehouse("MAIN").await;
    let branch = app.seed_warehouse("BRANCH").await;
    app.stock(item.id, main.id, 12).await;

    let result = app
        .services
        .inventory
        .transfer(item.id, main.id, branch.id, 5, None, None)
        .await
        .unwrap();

    assert_eq!(result.outbound.movement.quantity, -5);
    assert_eq!(result.inbound.movement.quantity, 5);
    assert_eq!(
        result.outbound.movement.reference_id,
        result.inbound.movement.reference_id
    );
    assert_eq!(app.level_quantity(item.id, main.id).await, 7);
    assert_eq!(app.level_quantity(item.id, branch.id).await, 5);
}

#[tokio::test]
async fn transfer_exceeding_source_stock_leaves_both_sides_untouched() {
    let app = TestApp::new().await;
    let item = app.seed_item("RAM-001", 25, 70).await;
    let main = app.seed_warehouse("MAIN").await;
    let branch = app.seed_warehouse("BRANCH").await;
    app.stock(item.id, main.id, 3).await;

    let err = app
        .services
        .inventory
        .transfer(item.id, main.id, branch.id, 4, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    assert_eq!(app.level_quantity(item.id, main.id).await, 3);
    assert_eq!(app.level_quantity(item.id, branch.id).await, 0);
}

#[tokio::test]
async fn transfer_rejects_same_warehouse_and_bad_quantities() {
    let app = TestApp::new().await;
    let item = app.seed_item("PSU-001", 30, 80).await;
    let main = app.seed_warehouse("MAIN").await;
    let branch = app.seed_warehouse("BRANCH").await;

    let err = app
        .services
        .inventory
        .transfer(item.id, main.id, main.id, 2, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .inventory
        .transfer(item.id, main.id, branch.id, 0, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
