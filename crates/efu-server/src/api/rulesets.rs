//! RuleSets API endpoints.
//!
//! - GET /api/rulesets - List the caller's rulesets (`rules=<id>,<id>`)
//! - POST /api/rulesets - Create a ruleset, resolving nested rule specs
//! - GET /api/rulesets/{id} - Get a ruleset with its rules
//! - PATCH /api/rulesets/{id} - Partial update; `rules` replaces membership
//! - PUT /api/rulesets/{id} - Full replacement
//! - DELETE /api/rulesets/{id} - Delete a ruleset, keeping its rules

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;

use efu_core::api::RuleSetResponse;
use efu_core::{
    NewRuleSet, RuleSetChanges, RuleSetFilter, RuleSetReplacement, RuleSetRepository,
    RuleSetWriter,
};

use super::{auth::AuthUser, error::ApiError, owned, with_trailing_slash};
use crate::AppState;

pub fn router() -> Router<AppState> {
    let router = with_trailing_slash(
        Router::new(),
        "/rulesets",
        get(list_rulesets).post(create_ruleset),
    );
    with_trailing_slash(
        router,
        "/rulesets/{id}",
        get(owned::retrieve::<RuleSetRepository>)
            .patch(update_ruleset)
            .put(replace_ruleset)
            .delete(owned::destroy::<RuleSetRepository>),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct ListRuleSetsQuery {
    pub rules: Option<String>,
}

/// GET /api/rulesets
///
/// Newest first. `rules` keeps rulesets containing any of the listed rule ids.
async fn list_rulesets(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    query: Result<Query<ListRuleSetsQuery>, QueryRejection>,
) -> Result<Json<Vec<RuleSetResponse>>, ApiError> {
    let Query(query) = query?;
    let filter = RuleSetFilter::parse(query.rules.as_deref())?;
    let rulesets = RuleSetRepository::new(state.db.clone())
        .list_for_user(user_id, &filter)
        .await?;
    Ok(Json(
        rulesets.into_iter().map(RuleSetResponse::from).collect(),
    ))
}

/// POST /api/rulesets
async fn create_ruleset(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    body: Result<Json<NewRuleSet>, JsonRejection>,
) -> Result<(StatusCode, Json<RuleSetResponse>), ApiError> {
    let Json(new) = body?;
    let ruleset = RuleSetWriter::new(state.db.clone())
        .create(user_id, new)
        .await?;
    Ok((StatusCode::CREATED, Json(ruleset.into())))
}

/// PATCH /api/rulesets/{id}
async fn update_ruleset(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<RuleSetChanges>, JsonRejection>,
) -> Result<Json<RuleSetResponse>, ApiError> {
    let Path(id) = id?;
    let Json(changes) = body?;
    let ruleset = RuleSetWriter::new(state.db.clone())
        .partial_update(user_id, id, changes)
        .await?;
    Ok(Json(ruleset.into()))
}

/// PUT /api/rulesets/{id}
///
/// `name` and `description` are required; a missing `rules` list empties the set.
async fn replace_ruleset(
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<RuleSetReplacement>, JsonRejection>,
) -> Result<Json<RuleSetResponse>, ApiError> {
    let Path(id) = id?;
    let Json(replacement) = body?;
    let ruleset = RuleSetWriter::new(state.db.clone())
        .full_update(user_id, id, replacement)
        .await?;
    Ok(Json(ruleset.into()))
}
