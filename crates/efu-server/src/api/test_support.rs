use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use efu_core::{
    Database, TokenRepository, UserId, UserRepository, migrations::run_migrations,
};

use crate::{AppState, router};

pub(crate) struct TestUser {
    pub user_id: UserId,
    pub token: String,
}

/// A migrated database, the full router, and two users with tokens.
pub(crate) struct TestApp {
    router: Router,
    pub alice: TestUser,
    pub bob: TestUser,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("test.sqlite");
        let db = Database::new(&db_path).await.expect("create db");
        run_migrations(&db).await.expect("migrations");

        let alice = create_user(&db, "alice@example.com").await;
        let bob = create_user(&db, "bob@example.com").await;

        Self {
            router: router(AppState { db }),
            alice,
            bob,
            _dir: dir,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<&TestUser>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.send_raw(method, uri, user, body.map(|body| body.to_string()))
            .await
    }

    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        user: Option<&TestUser>,
        body: Option<String>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header(header::AUTHORIZATION, format!("Token {}", user.token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body)),
            None => request.body(Body::empty()),
        }
        .expect("build request");

        self.dispatch(request).await
    }

    pub async fn send_with_header(
        &self,
        method: Method,
        uri: &str,
        authorization: &str,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, authorization)
            .body(Body::empty())
            .expect("build request");
        self.dispatch(request).await
    }

    /// POST a ruleset and return the created body.
    pub async fn create_ruleset(&self, user: &TestUser, body: Value) -> Value {
        let (status, created) = self
            .send(Method::POST, "/api/rulesets/", Some(user), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create ruleset: {created}");
        created
    }

    async fn dispatch(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }
}

async fn create_user(db: &Database, email: &str) -> TestUser {
    let user = UserRepository::new(db.clone())
        .create(email)
        .await
        .expect("create user");
    let token = TokenRepository::new(db.clone())
        .issue(user.id)
        .await
        .expect("issue token");
    TestUser {
        user_id: user.id,
        token: token.key,
    }
}
