use super::common::{
    created_response, success_response, validate_input, ActorId, PaginatedResponse,
    PaginationParams,
};
use crate::{
    entities::purchase_order::ApprovalStatus,
    errors::ServiceError,
    handlers::AppState,
    services::purchase_orders::{NewPurchaseOrder, NewPurchaseOrderLine, ReceiptLine},
};
use axum::{
    extract::{Json, Path, Query, State},
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
pub struct CreatePurchaseOrderRequest {
    pub vendor_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(length(min = 1))]
    pub lines: Vec<PurchaseOrderLineRequest>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PurchaseOrderLineRequest {
    pub item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub unit_cost: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectPurchaseOrderRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveItemsRequest {
    #[validate(length(min = 1))]
    pub lines: Vec<ReceiptLineRequest>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ReceiptLineRequest {
    pub item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct ListPurchaseOrdersQuery {
    pub approval_status: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

pub async fn create_purchase_order(
    State(state): State<AppState>,
    actor: ActorId,
    Json(payload): Json<CreatePurchaseOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    for line in &payload.lines {
        validate_input(line)?;
    }

    let lines = payload
        .lines
        .into_iter()
        .map(|l| NewPurchaseOrderLine {
            item_id: l.item_id,
            quantity: l.quantity,
            unit_cost: l.unit_cost,
        })
        .collect();

    let (order, items) = state
        .services
        .purchase_orders
        .create_purchase_order(NewPurchaseOrder {
            vendor_id: payload.vendor_id,
            warehouse_id: payload.warehouse_id,
            lines,
            notes: payload.notes,
            created_by: actor.0,
        })
        .await?;

    Ok(created_response(json!({
        "purchase_order": order,
        "items": items,
    })))
}

pub async fn get_purchase_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, items) = state.services.purchase_orders.get_purchase_order(id).await?;
    Ok(success_response(json!({
        "purchase_order": order,
        "items": items,
    })))
}

pub async fn list_purchase_orders(
    State(state): State<AppState>,
    Query(query): Query<ListPurchaseOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let approval = match &query.approval_status {
        Some(raw) => Some(ApprovalStatus::from_str(raw).ok_or_else(|| {
            ServiceError::ValidationError(format!("'{}' is not an approval status", raw))
        })?),
        None => None,
    };

    let defaults = PaginationParams::default();
    let page = query.page.unwrap_or(defaults.page);
    let per_page = query.per_page.unwrap_or(defaults.per_page);

    let (orders, total) = state
        .services
        .purchase_orders
        .list_purchase_orders(approval, page, per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        orders, page, per_page, total,
    )))
}

pub async fn approve_purchase_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
) -> Result<impl IntoResponse, ServiceError> {
    let approver = actor.require()?;
    let order = state.services.purchase_orders.approve(id, approver).await?;
    Ok(success_response(order))
}

pub async fn reject_purchase_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<RejectPurchaseOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let rejector = actor.require()?;
    let order = state
        .services
        .purchase_orders
        .reject(id, rejector, payload.reason)
        .await?;
    Ok(success_response(order))
}

pub async fn receive_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<ReceiveItemsRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    for line in &payload.lines {
        validate_input(line)?;
    }

    let receipts = payload
        .lines
        .into_iter()
        .map(|l| ReceiptLine {
            item_id: l.item_id,
            quantity: l.quantity,
        })
        .collect();

    let (order, items) = state
        .services
        .purchase_orders
        .receive_items(id, receipts, actor.0)
        .await?;

    Ok(success_response(json!({
        "purchase_order": order,
        "items": items,
    })))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_purchase_order).get(list_purchase_orders))
        .route("/:id", get(get_purchase_order))
        .route("/:id/approve", post(approve_purchase_order))
        .route("/:id/reject", post(reject_purchase_order))
        .route("/:id/receive", post(receive_items))
}
