use super::common::{created_response, success_response, validate_input, ActorId};
use crate::{
    entities::stock_count::StockCountStatus,
    errors::ServiceError,
    handlers::AppState,
    services::stock_counts::{CountEntry, NewStockCount},
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct CreateStockCountRequest {
    pub warehouse_id: Uuid,
    pub count_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordCountItemRequest {
    pub item_id: Uuid,
    #[validate(range(min = 0))]
    pub counted_quantity: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdvanceCountRequest {
    #[validate(length(min = 1))]
    pub status: String,
}

pub async fn create_count(
    State(state): State<AppState>,
    actor: ActorId,
    Json(payload): Json<CreateStockCountRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let count = state
        .services
        .stock_counts
        .create_count(NewStockCount {
            warehouse_id: payload.warehouse_id,
            count_date: payload.count_date,
            notes: payload.notes,
            created_by: actor.0,
        })
        .await?;

    Ok(created_response(count))
}

pub async fn get_count(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (count, items) = state.services.stock_counts.get_count(id).await?;
    Ok(success_response(json!({
        "count": count,
        "items": items,
    })))
}

pub async fn record_count_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<RecordCountItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let (count, item) = state
        .services
        .stock_counts
        .record_count_item(
            id,
            CountEntry {
                item_id: payload.item_id,
                counted_quantity: payload.counted_quantity,
                counted_by: actor.0,
                notes: payload.notes,
            },
        )
        .await?;

    Ok(success_response(json!({
        "count": count,
        "item": item,
    })))
}

pub async fn advance_count(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    actor: ActorId,
    Json(payload): Json<AdvanceCountRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let to = StockCountStatus::from_str(&payload.status).ok_or_else(|| {
        ServiceError::ValidationError(format!("'{}' is not a stock count status", payload.status))
    })?;

    let count = state.services.stock_counts.advance(id, to, actor.0).await?;
    Ok(success_response(count))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_count))
        .route("/:id", get(get_count))
        .route("/:id/items", post(record_count_item))
        .route("/:id/advance", post(advance_count))
}
