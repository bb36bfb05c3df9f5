//! HTTP API handlers.
//!
//! Every route requires a token and is scoped to the authenticated user.
//! Paths are served with and without a trailing slash.

pub mod auth;
pub mod error;
pub mod owned;
pub mod rules;
pub mod rulesets;

#[cfg(test)]
pub(crate) mod test_support;

use axum::{Router, routing::MethodRouter};

use crate::AppState;

/// Create the main API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(rules::router())
        .merge(rulesets::router())
}

/// Register `path` and `path/` with the same handlers.
pub(crate) fn with_trailing_slash(
    router: Router<AppState>,
    path: &str,
    handlers: MethodRouter<AppState>,
) -> Router<AppState> {
    router
        .route(path, handlers.clone())
        .route(&format!("{path}/"), handlers)
}
