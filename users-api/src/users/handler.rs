use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use super::{NewUser, User};
use crate::router::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("user directory lookup failed: {0}")]
    DirectoryUnavailable(#[source] anyhow::Error),

    #[error("could not persist user: {0}")]
    Storage(#[source] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Collaborator failures stay contained to this request: log, answer
        // 5xx, keep serving.
        error!("{}", self);
        let status = match self {
            ApiError::DirectoryUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        status.into_response()
    }
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let users = state
        .directory
        .list_users()
        .await
        .map_err(ApiError::DirectoryUnavailable)?;
    Ok(Json(users))
}

pub async fn create(
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> Result<StatusCode, ApiError> {
    state.store.save(&user).await.map_err(ApiError::Storage)?;
    Ok(StatusCode::CREATED)
}
