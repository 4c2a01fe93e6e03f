mod common;

use assert_matches::assert_matches;
use common::{dec, TestApp};
use repairhub_api::{entities::repair_order::RepairStatus, errors::ServiceError};
use uuid::Uuid;

#[tokio::test]
async fn create_order_starts_in_received_with_an_opening_log_row() {
    let app = TestApp::new().await;
    let order = app.new_order().await;

    assert_eq!(order.repair_status(), Some(RepairStatus::Received));
    assert!(order.order_number.starts_with("RO-"));

    let history = app
        .services
        .repair_orders
        .status_history(order.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_status, None);
    assert_eq!(history[0].to_status, "received");
}

#[tokio::test]
async fn quotation_path_walks_the_happy_road() {
    let app = TestApp::new().await;
    let svc = &app.services.repair_orders;
    let order = app.new_order().await;
    let tech = Uuid::new_v4();

    let order = svc.begin_inspection(order.id, None).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::Inspection));

    let order = svc.send_quotation(order.id, dec(250), None).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::QuotationSent));
    assert_eq!(order.estimated_cost, Some(dec(250)));

    let order = svc.approve_quotation(order.id, None).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::QuotationApproved));

    let order = svc
        .start_repair(order.id, tech, Some(dec(260)), None)
        .await
        .unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::UnderRepair));
    assert_eq!(order.technician_id, Some(tech));
    assert_eq!(order.estimated_cost, Some(dec(260)));

    let order = svc.mark_waiting_parts(order.id, None, None).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::WaitingParts));

    let order = svc.resume_repair(order.id, None).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::UnderRepair));

    // Every hop is in the audit log, in order.
    let history = app
        .services
        .repair_orders
        .status_history(order.id)
        .await
        .unwrap();
    let statuses: Vec<&str> = history.iter().map(|l| l.to_status.as_str()).collect();
    assert_eq!(
        statuses,
        vec![
            "received",
            "inspection",
            "quotation_sent",
            "quotation_approved",
            "under_repair",
            "waiting_parts",
            "under_repair",
        ]
    );
}

#[tokio::test]
async fn transitions_outside_the_table_are_rejected() {
    let app = TestApp::new().await;
    let svc = &app.services.repair_orders;
    let order = app.new_order().await;

    // received cannot jump to quotation_approved
    let err = svc.approve_quotation(order.id, None).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(msg) => {
        assert!(msg.contains("received"));
        assert!(msg.contains("quotation_approved"));
    });

    // the failed attempt wrote no log row
    let history = svc.status_history(order.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn rejected_is_terminal() {
    let app = TestApp::new().await;
    let svc = &app.services.repair_orders;
    let order = app.new_order().await;

    let order = svc
        .reject(order.id, "customer declined".to_string(), None)
        .await
        .unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::Rejected));

    let err = svc.begin_inspection(order.id, None).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn reject_requires_a_reason() {
    let app = TestApp::new().await;
    let order = app.new_order().await;

    let err = app
        .services
        .repair_orders
        .reject(order.id, "  ".to_string(), None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn hold_resumes_to_the_status_it_interrupted() {
    let app = TestApp::new().await;
    let svc = &app.services.repair_orders;
    let order = app.order_under_repair().await;

    let order = svc
        .hold(order.id, None, Some("waiting for customer callback".to_string()))
        .await
        .unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::OnHold));

    let order = svc.resume_from_hold(order.id, None).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::UnderRepair));
}

#[tokio::test]
async fn resume_from_hold_requires_a_held_order() {
    let app = TestApp::new().await;
    let order = app.new_order().await;

    let err = app
        .services
        .repair_orders
        .resume_from_hold(order.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(_));
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let app = TestApp::new().await;
    let err = app
        .services
        .repair_orders
        .get_order(Uuid::new_v4())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}
