mod common;

use assert_matches::assert_matches;
use common::{dec, TestApp};
use repairhub_api::{
    entities::{invoice::InvoiceStatus, payment::REFUND_METHOD, repair_order::RepairStatus},
    errors::ServiceError,
    services::invoicing::{NewInvoice, NewInvoiceLine, NewPayment},
};
use rust_decimal::Decimal;
use uuid::Uuid;

fn invoice_for(order_id: Uuid, labor: i64, parts: i64) -> NewInvoice {
    NewInvoice {
        repair_order_id: order_id,
        lines: vec![
            NewInvoiceLine {
                description: "labor".to_string(),
                quantity: 1,
                unit_price: dec(labor),
            },
            NewInvoiceLine {
                description: "parts".to_string(),
                quantity: 1,
                unit_price: dec(parts),
            },
        ],
        tax_amount: Decimal::ZERO,
        shipping_amount: Decimal::ZERO,
        discount_amount: Decimal::ZERO,
        created_by: None,
    }
}

fn payment(amount: Decimal) -> NewPayment {
    NewPayment {
        amount,
        method: "card".to_string(),
        reference: None,
        received_by: None,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn invoicing_a_completed_order_moves_it_to_invoiced() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;

    let detail = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 600, 400))
        .await
        .unwrap();

    assert_eq!(detail.invoice.subtotal, dec(1000));
    assert_eq!(detail.invoice.total_amount, dec(1000));
    assert_eq!(detail.invoice.invoice_status(), Some(InvoiceStatus::Issued));
    assert_eq!(detail.lines.len(), 2);

    let order = app.services.repair_orders.get_order(order.id).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::Invoiced));
}

#[tokio::test]
async fn invoicing_requires_a_completed_order() {
    let app = TestApp::new().await;
    let order = app.order_under_repair().await;

    let err = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 100, 0))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(_));
}

#[tokio::test]
async fn an_order_carries_at_most_one_open_invoice() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;

    app.services
        .invoicing
        .create_invoice(invoice_for(order.id, 100, 0))
        .await
        .unwrap();

    // Re-running against the now-invoiced order fails on status, and even a
    // voided-then-recompleted order only accepts one open invoice at a time.
    let err = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 100, 0))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(_));
}

#[tokio::test]
async fn payments_reconcile_partially_then_fully_then_reject_overpayment() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;
    let invoice = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 600, 400))
        .await
        .unwrap()
        .invoice;

    let outcome = app
        .services
        .invoicing
        .apply_payment(invoice.id, payment(dec(600)))
        .await
        .unwrap();
    assert_eq!(outcome.invoice.amount_paid, dec(600));
    assert_eq!(
        outcome.invoice.invoice_status(),
        Some(InvoiceStatus::PartiallyPaid)
    );

    let outcome = app
        .services
        .invoicing
        .apply_payment(invoice.id, payment(dec(400)))
        .await
        .unwrap();
    assert_eq!(outcome.invoice.amount_paid, dec(1000));
    assert_eq!(outcome.invoice.invoice_status(), Some(InvoiceStatus::Paid));

    let err = app
        .services
        .invoicing
        .apply_payment(invoice.id, payment(dec(1)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::OverpaymentRejected(msg) => {
        assert!(msg.contains("remaining balance 0"));
    });

    // The rejected payment left no ledger row.
    let detail = app.services.invoicing.get_invoice(invoice.id).await.unwrap();
    assert_eq!(detail.payments.len(), 2);
}

#[tokio::test]
async fn idempotency_key_replays_the_original_payment() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;
    let invoice = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 500, 0))
        .await
        .unwrap()
        .invoice;

    let first = app
        .services
        .invoicing
        .apply_payment(
            invoice.id,
            NewPayment {
                idempotency_key: Some("retry-abc".to_string()),
                ..payment(dec(200))
            },
        )
        .await
        .unwrap();
    assert!(!first.replayed);

    let second = app
        .services
        .invoicing
        .apply_payment(
            invoice.id,
            NewPayment {
                idempotency_key: Some("retry-abc".to_string()),
                ..payment(dec(200))
            },
        )
        .await
        .unwrap();
    assert!(second.replayed);
    assert_eq!(second.payment.id, first.payment.id);
    assert_eq!(second.invoice.amount_paid, dec(200));
}

#[tokio::test]
async fn refunds_are_negative_ledger_rows_and_walk_the_status_back() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;
    let invoice = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 300, 0))
        .await
        .unwrap()
        .invoice;

    app.services
        .invoicing
        .apply_payment(invoice.id, payment(dec(300)))
        .await
        .unwrap();

    let outcome = app
        .services
        .invoicing
        .refund_payment(invoice.id, dec(100), None, None)
        .await
        .unwrap();
    assert_eq!(outcome.payment.amount, -dec(100));
    assert_eq!(outcome.payment.method, REFUND_METHOD);
    assert_eq!(outcome.invoice.amount_paid, dec(200));
    assert_eq!(
        outcome.invoice.invoice_status(),
        Some(InvoiceStatus::PartiallyPaid)
    );

    // Cannot refund more than was paid.
    let err = app
        .services
        .invoicing
        .refund_payment(invoice.id, dec(201), None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn voiding_requires_zero_paid_and_reopens_the_order() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;
    let invoice = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 150, 0))
        .await
        .unwrap()
        .invoice;

    app.services
        .invoicing
        .apply_payment(invoice.id, payment(dec(50)))
        .await
        .unwrap();

    let err = app
        .services
        .invoicing
        .void_invoice(invoice.id, None, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PreconditionFailed(_));

    app.services
        .invoicing
        .refund_payment(invoice.id, dec(50), None, None)
        .await
        .unwrap();

    let voided = app
        .services
        .invoicing
        .void_invoice(invoice.id, None, Some("wrong line items".to_string()))
        .await
        .unwrap();
    assert_eq!(voided.invoice_status(), Some(InvoiceStatus::Voided));

    // The order is back in completed and can be re-invoiced.
    let order = app.services.repair_orders.get_order(order.id).await.unwrap();
    assert_eq!(order.repair_status(), Some(RepairStatus::Completed));

    let reissued = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 140, 0))
        .await
        .unwrap();
    assert_eq!(reissued.invoice.total_amount, dec(140));
}

#[tokio::test]
async fn payments_to_a_voided_invoice_are_refused() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;
    let invoice = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 80, 0))
        .await
        .unwrap()
        .invoice;

    app.services
        .invoicing
        .void_invoice(invoice.id, None, None)
        .await
        .unwrap();

    let err = app
        .services
        .invoicing
        .apply_payment(invoice.id, payment(dec(80)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvoiceAlreadyClosed(_));
}

#[tokio::test]
async fn negative_totals_and_bad_payment_amounts_are_rejected() {
    let app = TestApp::new().await;
    let order = app.order_completed().await;

    let err = app
        .services
        .invoicing
        .create_invoice(NewInvoice {
            discount_amount: dec(200),
            ..invoice_for(order.id, 100, 0)
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let invoice = app
        .services
        .invoicing
        .create_invoice(invoice_for(order.id, 100, 0))
        .await
        .unwrap()
        .invoice;

    let err = app
        .services
        .invoicing
        .apply_payment(invoice.id, payment(Decimal::ZERO))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .services
        .invoicing
        .apply_payment(
            invoice.id,
            NewPayment {
                method: REFUND_METHOD.to_string(),
                ..payment(dec(10))
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}
