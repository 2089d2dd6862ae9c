use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use greeter_core::{ApplicationError, InterfaceError, Item, ItemId, NewItem};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DataEnvelope<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> DataEnvelope<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self { status: "success", data })
    }
}

/// HTTP rendering of an [`InterfaceError`].
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl From<InterfaceError> for ApiError {
    fn from(value: InterfaceError) -> Self {
        Self(value)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(
                event_name = "system.http.error",
                correlation_id = self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0,
                "request failed"
            );
        }

        let body = StatusMessage { status: "error", message: self.0.user_message().to_owned() };
        (status, Json(body)).into_response()
    }
}

pub async fn index() -> Json<StatusMessage> {
    Json(StatusMessage { status: "ok", message: "API is running".to_owned() })
}

pub async fn list_items(State(state): State<AppState>) -> Json<DataEnvelope<Vec<Item>>> {
    DataEnvelope::success(state.items.list())
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataEnvelope<Item>>, ApiError> {
    let item = state
        .items
        .get(&ItemId(id.clone()))
        .map_err(|error| ApplicationError::from(error).into_interface(id))?;
    Ok(DataEnvelope::success(item))
}

pub async fn create_item(
    State(state): State<AppState>,
    payload: Result<Json<NewItem>, JsonRejection>,
) -> Result<(StatusCode, Json<DataEnvelope<Item>>), ApiError> {
    let Json(new_item) =
        payload.map_err(|rejection| InterfaceError::bad_request(rejection.body_text(), "items"))?;
    let item = state
        .items
        .create(new_item)
        .map_err(|error| ApplicationError::from(error).into_interface("items"))?;

    info!(
        event_name = "api.items.created",
        correlation_id = %item.id,
        item_name = %item.name,
        "item created"
    );
    Ok((StatusCode::CREATED, DataEnvelope::success(item)))
}

/// Answers CORS preflight and any other `OPTIONS` request with an empty object.
pub async fn preflight() -> Json<serde_json::Value> {
    Json(json!({}))
}

pub async fn fallback(method: Method) -> Response {
    if method == Method::OPTIONS {
        return preflight().await.into_response();
    }
    ApiError(InterfaceError::not_found("Not found", "unrouted")).into_response()
}

/// Body for a handler that panicked, used by `CatchPanicLayer`.
pub fn panic_response(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    ApiError(InterfaceError::internal("handler panicked", "panic")).into_response()
}
