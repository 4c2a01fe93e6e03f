use super::common::{success_response, validate_input, ActorId, PaginatedResponse, PaginationParams};
use crate::{
    entities::stock_movement::MovementType,
    errors::ServiceError,
    handlers::AppState,
    services::inventory::NewMovement,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct PostMovementRequest {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    /// Signed delta; sign must agree with the movement type.
    pub quantity: i32,
    #[validate(length(min = 1))]
    pub movement_type: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransferRequest {
    pub item_id: Uuid,
    pub from_warehouse_id: Uuid,
    pub to_warehouse_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StockLevelResponse {
    pub item_id: Uuid,
    pub warehouse_id: Uuid,
    pub quantity: i32,
}

pub async fn post_movement(
    State(state): State<AppState>,
    actor: ActorId,
    Json(payload): Json<PostMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let movement_type = MovementType::from_str(&payload.movement_type).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "'{}' is not a movement type",
            payload.movement_type
        ))
    })?;

    let posted = state
        .services
        .inventory
        .post_movement(NewMovement {
            item_id: payload.item_id,
            warehouse_id: payload.warehouse_id,
            quantity: payload.quantity,
            movement_type,
            reason: payload.reason,
            reference: None,
            performed_by: actor.0,
        })
        .await?;

    Ok(success_response(json!({
        "movement": posted.movement,
        "level": posted.level,
    })))
}

pub async fn transfer(
    State(state): State<AppState>,
    actor: ActorId,
    Json(payload): Json<TransferRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let result = state
        .services
        .inventory
        .transfer(
            payload.item_id,
            payload.from_warehouse_id,
            payload.to_warehouse_id,
            payload.quantity,
            payload.reason,
            actor.0,
        )
        .await?;

    Ok(success_response(json!({
        "outbound": result.outbound.movement,
        "inbound": result.inbound.movement,
        "from_level": result.outbound.level,
        "to_level": result.inbound.level,
    })))
}

pub async fn get_stock_level(
    State(state): State<AppState>,
    Path((item_id, warehouse_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let level = state
        .services
        .inventory
        .get_stock_level(item_id, warehouse_id)
        .await?;

    // A level that has never moved reads as zero.
    let response = match level {
        Some(level) => StockLevelResponse {
            item_id: level.item_id,
            warehouse_id: level.warehouse_id,
            quantity: level.quantity,
        },
        None => StockLevelResponse {
            item_id,
            warehouse_id,
            quantity: 0,
        },
    };
    Ok(success_response(response))
}

pub async fn list_movements(
    State(state): State<AppState>,
    Path((item_id, warehouse_id)): Path<(Uuid, Uuid)>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let (movements, total) = state
        .services
        .inventory
        .list_movements(item_id, warehouse_id, pagination.page, pagination.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        movements,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/movements", post(post_movement))
        .route("/transfers", post(transfer))
        .route("/levels/:item_id/:warehouse_id", get(get_stock_level))
        .route("/movements/:item_id/:warehouse_id", get(list_movements))
}
