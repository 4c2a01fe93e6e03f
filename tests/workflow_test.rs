mod common;

use assert_matches::assert_matches;
use common::{dec, TestApp};
use repairhub_api::{
    entities::{
        invoice::InvoiceStatus, repair_order::RepairStatus, stock_movement::MovementType,
    },
    errors::ServiceError,
    services::{
        invoicing::{NewInvoice, NewInvoiceLine, NewPayment},
        workflow::PartLine,
    },
};
use rust_decimal::Decimal;
use uuid::Uuid;

#[tokio::test]
async fn completing_a_repair_consumes_parts_and_records_the_cost() {
    let app = TestApp::new().await;
    let wh = app.seed_warehouse("MAIN").await;
    let screen = app.seed_item("SCREEN-001", 40, 90).await;
    let battery = app.seed_item("BATT-001", 20, 55).await;
    app.stock(screen.id, wh.id, 5).await;
    app.stock(battery.id, wh.id, 5).await;

    let order = app.order_under_repair().await;
    let result = app
        .services
        .workflow
        .complete_repair(
            order.id,
            dec(180),
            vec![
                PartLine {
                    item_id: screen.id,
                    warehouse_id: wh.id,
                    quantity: 1,
                },
                // Duplicate lines for one part collapse into a single draw.
                PartLine {
                    item_id: battery.id,
                    warehouse_id: wh.id,
                    quantity: 1,
                },
                PartLine {
                    item_id: battery.id,
                    warehouse_id: wh.id,
                    quantity: 1,
                },
            ],
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.order.repair_status(), Some(RepairStatus::Completed));
    assert_eq!(result.order.actual_cost, Some(dec(180)));
    assert_eq!(result.movements.len(), 2);
    assert!(result
        .movements
        .iter()
        .all(|m| m.movement_type == MovementType::Out.as_str()
            && m.reference_id == Some(result.order.id)));

    assert_eq!(app.level_quantity(screen.id, wh.id).await, 4);
    assert_eq!(app.level_quantity(battery.id, wh.id).await, 3);
}

#[tokio::test]
async fn a_shortfall_on_any_part_leaves_everything_untouched() {
    let app = TestApp::new().await;
    let wh = app.seed_warehouse("MAIN").await;
    let screen = app.seed_item("SCREEN-001", 40, 90).await;
    let battery = app.seed_item("BATT-001", 20, 55).await;
    app.stock(screen.id, wh.id, 5).await;
    app.stock(battery.id, wh.id, 1).await;

    let order = app.order_under_repair().await;
    let err = app
        .services
        .workflow
        .complete_repair(
            order.id,
            dec(180),
            vec![
                PartLine {
                    item_id: screen.id,
                    warehouse_id: wh.id,
                    quantity: 2,
                },
                PartLine {
                    item_id: battery.id,
                    warehouse_id: wh.id,
                    quantity: 2,
                },
            ],
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // Zero movements, order still on the bench, no cost recorded.
    assert_eq!(app.level_quantity(screen.id, wh.id).await, 5);
    assert_eq!(app.level_quantity(battery.id, wh.id).await, 1);
    let order = app.services.repair_orders.get_order(order.id).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::UnderRepair));
    assert_eq!(order.actual_cost, None);
}

#[tokio::test]
async fn completion_requires_an_order_on_the_bench() {
    let app = TestApp::new().await;
    let order = app.new_order().await;

    let err = app
        .services
        .workflow
        .complete_repair(order.id, dec(50), Vec::new(), None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition(_));
}

#[tokio::test]
async fn delivery_is_gated_on_a_paid_invoice() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;

    // No invoice at all.
    let err = app
        .services
        .workflow
        .deliver_device(order.id, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(_));

    let invoice = app
        .services
        .invoicing
        .create_invoice(NewInvoice {
            repair_order_id: order.id,
            lines: vec![NewInvoiceLine {
                description: "labor".to_string(),
                quantity: 1,
                unit_price: dec(200),
            }],
            tax_amount: Decimal::ZERO,
            shipping_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            created_by: None,
        })
        .await
        .unwrap()
        .invoice;

    // Unpaid invoice still blocks staging and delivery.
    let err = app
        .services
        .repair_orders
        .mark_ready_for_delivery(order.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(msg) => {
        assert!(msg.contains("not fully paid"));
    });

    app.services
        .invoicing
        .apply_payment(
            invoice.id,
            NewPayment {
                amount: dec(200),
                method: "cash".to_string(),
                reference: None,
                received_by: None,
                idempotency_key: None,
            },
        )
        .await
        .unwrap();

    let order = app
        .services
        .repair_orders
        .mark_ready_for_delivery(order.id, None)
        .await
        .unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::ReadyForDelivery));

    let courier = Uuid::new_v4();
    let order = app
        .services
        .workflow
        .deliver_device(order.id, courier, Some("J. Doe".to_string()))
        .await
        .unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::Delivered));
    assert_eq!(order.delivered_by, Some(courier));
    assert_eq!(order.delivery_signature.as_deref(), Some("J. Doe"));
    assert!(order.delivered_at.is_some());
}

#[tokio::test]
async fn the_full_repair_to_cash_path_runs_end_to_end() {
    let app = TestApp::new().await;
    let wh = app.seed_warehouse("MAIN").await;
    let screen = app.seed_item("SCREEN-001", 40, 90).await;
    app.stock(screen.id, wh.id, 3).await;

    let svc = &app.services;
    let order = app.new_order().await;
    let order = svc.repair_orders.begin_inspection(order.id, None).await.unwrap();
    let order = svc
        .repair_orders
        .send_quotation(order.id, dec(150), None)
        .await
        .unwrap();
    let order = svc.repair_orders.approve_quotation(order.id, None).await.unwrap();
    let order = svc
        .repair_orders
        .start_repair(order.id, Uuid::new_v4(), None, None)
        .await
        .unwrap();

    let result = svc
        .workflow
        .complete_repair(
            order.id,
            dec(150),
            vec![PartLine {
                item_id: screen.id,
                warehouse_id: wh.id,
                quantity: 1,
            }],
            None,
        )
        .await
        .unwrap();

    let invoice = svc
        .invoicing
        .create_invoice(NewInvoice {
            repair_order_id: result.order.id,
            lines: vec![
                NewInvoiceLine {
                    description: "labor".to_string(),
                    quantity: 1,
                    unit_price: dec(60),
                },
                NewInvoiceLine {
                    description: "replacement screen".to_string(),
                    quantity: 1,
                    unit_price: dec(90),
                },
            ],
            tax_amount: Decimal::ZERO,
            shipping_amount: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            created_by: None,
        })
        .await
        .unwrap()
        .invoice;
    assert_eq!(invoice.total_amount, dec(150));

    let outcome = svc
        .invoicing
        .apply_payment(
            invoice.id,
            NewPayment {
                amount: dec(150),
                method: "card".to_string(),
                reference: None,
                received_by: None,
                idempotency_key: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(outcome.invoice.invoice_status(), Some(InvoiceStatus::Paid));

    svc.repair_orders
        .mark_ready_for_delivery(order.id, None)
        .await
        .unwrap();
    let order = svc
        .workflow
        .deliver_device(order.id, Uuid::new_v4(), None)
        .await
        .unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::Delivered));
    assert_eq!(app.level_quantity(screen.id, wh.id).await, 2);
}
