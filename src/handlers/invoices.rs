use super::common::{created_response, success_response, validate_input, ActorId};
use crate::{
    errors::ServiceError,
    handlers::AppState,
    services::invoicing::{NewInvoice, NewInvoiceLine, NewPayment},
};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub repair_order_id: Uuid,
    #[validate(length(min = 1))]
    pub lines: Vec<InvoiceLineRequest>,
    #[serde(default)]
    pub tax_amount: Decimal,
    #[serde(default)]
    pub shipping_amount: Decimal,
    #[serde(default)]
    pub discount_amount: Decimal,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct InvoiceLineRequest {
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyPaymentRequest {
    pub amount: Decimal,
    #[validate(length(min = 1, max = 64))]
    pub method: String,
    pub reference: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: Decimal,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct VoidInvoiceRequest {
    pub reason: Option<String>,
}

pub async fn create_invoice(
    State(state): State<AppState>,
    actor: ActorId,
    Json(payload): Json<CreateInvoiceRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    for line in &payload.lines {
        validate_input(line)?;
    }

    let lines = payload
        .lines
        .into_iter()
        .map(|l| NewInvoiceLine {
            description: l.description,
            quantity: l.quantity,
            unit_price: l.unit_price,
        })
        .collect();

    let detail = state
        .services
        .invoicing
        .create_invoice(NewInvoice {
            repair_order_id: payload.repair_order_id,
            lines,
            tax_amount: payload.tax_amount,
            shipping_amount: payload.shipping_amount,
            discount_amount: payload.discount_amount,
            created_by: actor.0,
        })
        .await?;

    Ok(created_response(json!({
        "invoice": detail.invoice,
        "lines": detail.lines,
    })))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state.services.invoicing.get_invoice(id).await?;
    Ok(success_response(json!({
        "invoice": detail.invoice,
        "lines": detail.lines,
        "payments": detail.payments,
    })))
}

pub async fn apply_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<ApplyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let outcome = state
        .services
        .invoicing
        .apply_payment(
            id,
            NewPayment {
                amount: payload.amount,
                method: payload.method,
                reference: payload.reference,
                received_by: actor.0,
                idempotency_key: payload.idempotency_key,
            },
        )
        .await?;

    // A replayed idempotency key is a 200, a fresh payment a 201.
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        axum::Json(json!({
            "invoice": outcome.invoice,
            "payment": outcome.payment,
            "replayed": outcome.replayed,
        })),
    ))
}

pub async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<RefundRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let outcome = state
        .services
        .invoicing
        .refund_payment(id, payload.amount, payload.reference, actor.0)
        .await?;

    Ok(created_response(json!({
        "invoice": outcome.invoice,
        "payment": outcome.payment,
    })))
}

pub async fn void_invoice(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    payload: Option<Json<VoidInvoiceRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let reason = payload.and_then(|Json(p)| p.reason);
    let invoice = state
        .services
        .invoicing
        .void_invoice(id, actor.0, reason)
        .await?;
    Ok(success_response(invoice))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_invoice))
        .route("/:id", get(get_invoice))
        .route("/:id/payments", post(apply_payment))
        .route("/:id/refunds", post(refund_payment))
        .route("/:id/void", post(void_invoice))
}
