//! Retrieve and destroy handlers shared by every owner-scoped resource.

use axum::{
    Json,
    extract::{Path, State, rejection::PathRejection},
    http::StatusCode,
};
use serde::Serialize;

use efu_core::{OwnerScoped, RuleRepository, RuleSetRepository};
use efu_core::api::{RuleResponse, RuleSetResponse};

use super::{auth::AuthUser, error::ApiError};
use crate::AppState;

/// A repository exposed over HTTP, together with its response body.
pub trait Resource: OwnerScoped + Sized + 'static {
    type Body: Serialize + From<Self::Record> + Send + 'static;

    fn from_state(state: &AppState) -> Self;
}

impl Resource for RuleRepository {
    type Body = RuleResponse;

    fn from_state(state: &AppState) -> Self {
        RuleRepository::new(state.db.clone())
    }
}

impl Resource for RuleSetRepository {
    type Body = RuleSetResponse;

    fn from_state(state: &AppState) -> Self {
        RuleSetRepository::new(state.db.clone())
    }
}

/// GET /api/<resource>/{id}
pub async fn retrieve<R: Resource>(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<R::Body>, ApiError> {
    let Path(id) = id?;
    let record = R::from_state(&state).get_owned(user_id, id).await?;
    Ok(Json(record.into()))
}

/// DELETE /api/<resource>/{id}
pub async fn destroy<R: Resource>(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    R::from_state(&state).delete_owned(user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
