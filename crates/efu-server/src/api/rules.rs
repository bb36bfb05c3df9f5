//! Rules API endpoints.
//!
//! Rules are created implicitly through ruleset writes; this surface only
//! lists, retrieves, edits and deletes them.
//!
//! - GET /api/rules - List the caller's rules (`assigned_only=0|1`)
//! - GET /api/rules/{id} - Get a rule
//! - PATCH /api/rules/{id} - Update name, pattern or description
//! - PUT /api/rules/{id} - Replace name and pattern, optionally description
//! - DELETE /api/rules/{id} - Delete a rule and its ruleset links

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    routing::get,
};
use serde::Deserialize;

use efu_core::api::RuleResponse;
use efu_core::{RuleChanges, RuleFilter, RuleReplacement, RuleRepository};

use super::{auth::AuthUser, error::ApiError, owned, with_trailing_slash};
use crate::AppState;

pub fn router() -> Router<AppState> {
    let router = with_trailing_slash(Router::new(), "/rules", get(list_rules));
    with_trailing_slash(
        router,
        "/rules/{id}",
        get(owned::retrieve::<RuleRepository>)
            .patch(update_rule)
            .put(replace_rule)
            .delete(owned::destroy::<RuleRepository>),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRulesQuery {
    pub assigned_only: Option<String>,
}

/// GET /api/rules
///
/// Sorted by name descending; equal names keep creation order.
async fn list_rules(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    query: Result<Query<ListRulesQuery>, QueryRejection>,
) -> Result<Json<Vec<RuleResponse>>, ApiError> {
    let Query(query) = query?;
    let filter = RuleFilter::parse(query.assigned_only.as_deref())?;
    let rules = RuleRepository::new(state.db.clone())
        .list_for_user(user_id, &filter)
        .await?;
    Ok(Json(rules.into_iter().map(RuleResponse::from).collect()))
}

/// PATCH /api/rules/{id}
async fn update_rule(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<RuleChanges>, JsonRejection>,
) -> Result<Json<RuleResponse>, ApiError> {
    let Path(id) = id?;
    let Json(changes) = body?;
    let rule = RuleRepository::new(state.db.clone())
        .update(user_id, id, changes)
        .await?;
    Ok(Json(rule.into()))
}

/// PUT /api/rules/{id}
async fn replace_rule(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<RuleReplacement>, JsonRejection>,
) -> Result<Json<RuleResponse>, ApiError> {
    let Path(id) = id?;
    let Json(replacement) = body?;
    let rule = RuleRepository::new(state.db.clone())
        .update(user_id, id, replacement.into())
        .await?;
    Ok(Json(rule.into()))
}
