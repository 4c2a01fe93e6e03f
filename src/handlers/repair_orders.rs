use super::common::{
    created_response, success_response, validate_input, ActorId, PaginatedResponse,
    PaginationParams,
};
use crate::{
    entities::repair_order::RepairStatus,
    errors::ServiceError,
    handlers::AppState,
    services::{repair_orders::NewRepairOrder, workflow::PartLine},
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateRepairOrderRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub device: String,
    pub reported_problem: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendQuotationRequest {
    pub estimated_cost: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct StartRepairRequest {
    pub technician_id: Uuid,
    pub estimated_cost: Option<Decimal>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct NoteRequest {
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CompleteRepairRequest {
    pub actual_cost: Decimal,
    #[serde(default)]
    pub parts: Vec<PartLineRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PartLineRequest {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeliverRequest {
    pub signature: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

pub async fn create_order(
    State(state): State<AppState>,
    actor: ActorId,
    Json(payload): Json<CreateRepairOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let order = state
        .services
        .repair_orders
        .create_order(NewRepairOrder {
            customer_id: payload.customer_id,
            device: payload.device,
            reported_problem: payload.reported_problem,
            created_by: actor.0,
        })
        .await?;

    Ok(created_response(order))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.repair_orders.get_order(id).await?;
    Ok(success_response(order))
}

pub async fn status_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let logs = state.services.repair_orders.status_history(id).await?;
    Ok(success_response(logs))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = match &query.status {
        Some(raw) => Some(RepairStatus::from_str(raw).ok_or_else(|| {
            ServiceError::ValidationError(format!("'{}' is not a repair status", raw))
        })?),
        None => None,
    };

    let defaults = PaginationParams::default();
    let page = query.page.unwrap_or(defaults.page);
    let per_page = query.per_page.unwrap_or(defaults.per_page);

    let (orders, total) = state
        .services
        .repair_orders
        .list_orders(status, page, per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        orders, page, per_page, total,
    )))
}

pub async fn begin_inspection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .repair_orders
        .begin_inspection(id, actor.0)
        .await?;
    Ok(success_response(order))
}

pub async fn send_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<SendQuotationRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .repair_orders
        .send_quotation(id, payload.estimated_cost, actor.0)
        .await?;
    Ok(success_response(order))
}

pub async fn approve_quotation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .repair_orders
        .approve_quotation(id, actor.0)
        .await?;
    Ok(success_response(order))
}

pub async fn start_repair(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<StartRepairRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .repair_orders
        .start_repair(id, payload.technician_id, payload.estimated_cost, actor.0)
        .await?;
    Ok(success_response(order))
}

pub async fn mark_waiting_parts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    payload: Option<Json<NoteRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let note = payload.and_then(|Json(p)| p.note);
    let order = state
        .services
        .repair_orders
        .mark_waiting_parts(id, actor.0, note)
        .await?;
    Ok(success_response(order))
}

pub async fn resume_repair(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .repair_orders
        .resume_repair(id, actor.0)
        .await?;
    Ok(success_response(order))
}

pub async fn reject_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<RejectRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let order = state
        .services
        .repair_orders
        .reject(id, payload.reason, actor.0)
        .await?;
    Ok(success_response(order))
}

pub async fn hold_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    payload: Option<Json<NoteRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let note = payload.and_then(|Json(p)| p.note);
    let order = state.services.repair_orders.hold(id, actor.0, note).await?;
    Ok(success_response(order))
}

pub async fn resume_from_hold(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .repair_orders
        .resume_from_hold(id, actor.0)
        .await?;
    Ok(success_response(order))
}

pub async fn mark_ready_for_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .repair_orders
        .mark_ready_for_delivery(id, actor.0)
        .await?;
    Ok(success_response(order))
}

pub async fn complete_repair(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<CompleteRepairRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    for part in &payload.parts {
        validate_input(part)?;
    }

    let parts = payload
        .parts
        .into_iter()
        .map(|p| PartLine {
            item_id: p.item_id,
            warehouse_id: p.warehouse_id,
            quantity: p.quantity,
        })
        .collect();

    let result = state
        .services
        .workflow
        .complete_repair(id, payload.actual_cost, parts, actor.0)
        .await?;

    Ok(success_response(json!({
        "order": result.order,
        "movements": result.movements,
    })))
}

pub async fn deliver_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    payload: Option<Json<DeliverRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let delivered_by = actor.require()?;
    let signature = payload.and_then(|Json(p)| p.signature);

    let order = state
        .services
        .workflow
        .deliver_device(id, delivered_by, signature)
        .await?;
    Ok(success_response(order))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/history", get(status_history))
        .route("/:id/begin-inspection", post(begin_inspection))
        .route("/:id/quotation", post(send_quotation))
        .route("/:id/approve-quotation", post(approve_quotation))
        .route("/:id/start", post(start_repair))
        .route("/:id/waiting-parts", post(mark_waiting_parts))
        .route("/:id/resume-repair", post(resume_repair))
        .route("/:id/reject", post(reject_order))
        .route("/:id/hold", post(hold_order))
        .route("/:id/resume", post(resume_from_hold))
        .route("/:id/ready-for-delivery", post(mark_ready_for_delivery))
        .route("/:id/complete", post(complete_repair))
        .route("/:id/deliver", post(deliver_device))
}
