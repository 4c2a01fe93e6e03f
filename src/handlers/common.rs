use crate::errors::ServiceError;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// Who is performing the operation, taken from the `X-Actor-Id` header set
/// by the session layer in front of this service. Absent on anonymous
/// requests; operations that need an accountable actor call [`require`].
///
/// [`require`]: ActorId::require
#[derive(Debug, Clone, Copy)]
pub struct ActorId(pub Option<Uuid>);

impl ActorId {
    pub fn require(self) -> Result<Uuid, ServiceError> {
        self.0.ok_or_else(|| {
            ServiceError::ValidationError(
                "this operation requires an X-Actor-Id header".to_string(),
            )
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ActorId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.headers.get("x-actor-id") {
            None => Ok(ActorId(None)),
            Some(value) => {
                let raw = value.to_str().map_err(|_| {
                    ServiceError::ValidationError(
                        "X-Actor-Id header is not valid UTF-8".to_string(),
                    )
                })?;
                let id = Uuid::parse_str(raw).map_err(|_| {
                    ServiceError::ValidationError(
                        "X-Actor-Id header is not a valid UUID".to_string(),
                    )
                })?;
                Ok(ActorId(Some(id)))
            }
        }
    }
}

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, Serialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// Standard pagination response metadata
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(page: u64, per_page: u64, total: u64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(per_page)
        };
        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

/// Standard paginated response wrapper
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, page: u64, per_page: u64, total: u64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(page, per_page, total),
        }
    }
}
