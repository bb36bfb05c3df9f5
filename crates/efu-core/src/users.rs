//! Users and the API tokens that authenticate them.
//!
//! Every token maps to exactly one user and every user has at most one token.
//! Issuing a token for a user that already has one returns the existing key.

use chrono::{DateTime, Utc};
use libsql::{Row, params};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Database, DbError, is_unique_violation, now_rfc3339};

/// Identity of the authenticated requester, threaded through every owner-scoped call.
pub type UserId = i64;

const USER_COLUMNS: &str = "id, email, created_at";
const TOKEN_COLUMNS: &str = "key, user_id, created_at";
const TOKEN_LENGTH: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub key: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("user already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid email: {0:?}")]
    InvalidEmail(String),
    #[error("invalid or unknown token")]
    InvalidToken,
}

#[derive(Clone)]
pub struct UserRepository {
    db: Database,
}

impl UserRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, email: &str) -> Result<User, UserError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(UserError::InvalidEmail(email.to_string()));
        }

        let conn = self.db.connection().await?;
        let result = conn
            .execute(
                "INSERT INTO users (email, created_at) VALUES (?1, ?2)",
                params![email, now_rfc3339()],
            )
            .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(UserError::AlreadyExists(email.to_string()));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(email, "created user");
        self.get_by_id(conn.last_insert_rowid()).await
    }

    pub async fn get_by_id(&self, id: UserId) -> Result<User, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_user(row),
            None => Err(UserError::NotFound(id.to_string())),
        }
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email.trim()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_user(row),
            None => Err(UserError::NotFound(email.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct TokenRepository {
    db: Database,
}

impl TokenRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the user's token, creating one on first use.
    pub async fn issue(&self, user_id: UserId) -> Result<AuthToken, UserError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO auth_tokens (key, user_id, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id) DO NOTHING
                     RETURNING {TOKEN_COLUMNS}"
                ),
                params![generate_key(), user_id, now_rfc3339()],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            tracing::info!(user_id, "issued api token");
            return row_to_token(row);
        }

        let mut rows = conn
            .query(
                &format!("SELECT {TOKEN_COLUMNS} FROM auth_tokens WHERE user_id = ?1"),
                params![user_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_token(row),
            None => Err(UserError::NotFound(user_id.to_string())),
        }
    }

    /// Resolve a presented token key to the user that owns it.
    pub async fn authenticate(&self, key: &str) -> Result<UserId, UserError> {
        if key.is_empty() {
            return Err(UserError::InvalidToken);
        }

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT user_id FROM auth_tokens WHERE key = ?1",
                params![key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(UserError::InvalidToken),
        }
    }

    /// Drop the user's token; the next `issue` creates a fresh key.
    pub async fn revoke(&self, user_id: UserId) -> Result<(), UserError> {
        let conn = self.db.connection().await?;
        conn.execute(
            "DELETE FROM auth_tokens WHERE user_id = ?1",
            params![user_id],
        )
        .await?;
        Ok(())
    }
}

fn generate_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn row_to_user(row: Row) -> Result<User, UserError> {
    let created_at: String = row.get(2)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
    })
}

fn row_to_token(row: Row) -> Result<AuthToken, UserError> {
    let created_at: String = row.get(2)?;
    Ok(AuthToken {
        key: row.get(0)?,
        user_id: row.get(1)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use tempfile::TempDir;

    async fn setup_db() -> (Database, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join(format!("db_{}.sqlite", uuid::Uuid::new_v4()));
        let db = Database::new(&db_path).await.expect("create db");
        run_migrations(&db).await.expect("migrations");
        (db, dir)
    }

    #[tokio::test]
    async fn create_and_fetch_user() {
        let (db, _dir) = setup_db().await;
        let repo = UserRepository::new(db);

        let user = repo.create("user@example.com").await.expect("create user");
        assert_eq!(user.email, "user@example.com");

        let by_email = repo
            .get_by_email("user@example.com")
            .await
            .expect("fetch by email");
        assert_eq!(by_email.id, user.id);

        let by_id = repo.get_by_id(user.id).await.expect("fetch by id");
        assert_eq!(by_id, user);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let (db, _dir) = setup_db().await;
        let repo = UserRepository::new(db);

        repo.create("user@example.com").await.expect("first create");
        let err = repo
            .create("user@example.com")
            .await
            .expect_err("duplicate email");
        assert!(matches!(err, UserError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let (db, _dir) = setup_db().await;
        let repo = UserRepository::new(db);

        let err = repo.create("   ").await.expect_err("blank email");
        assert!(matches!(err, UserError::InvalidEmail(_)));
        let err = repo.create("no-at-sign").await.expect_err("no @");
        assert!(matches!(err, UserError::InvalidEmail(_)));
    }

    #[tokio::test]
    async fn issue_is_idempotent_per_user() {
        let (db, _dir) = setup_db().await;
        let users = UserRepository::new(db.clone());
        let tokens = TokenRepository::new(db);

        let user = users.create("user@example.com").await.expect("create user");
        let first = tokens.issue(user.id).await.expect("issue token");
        let second = tokens.issue(user.id).await.expect("reissue token");

        assert_eq!(first.key.len(), TOKEN_LENGTH);
        assert!(first.key.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(first.key, second.key);
    }

    #[tokio::test]
    async fn authenticate_maps_key_to_owner() {
        let (db, _dir) = setup_db().await;
        let users = UserRepository::new(db.clone());
        let tokens = TokenRepository::new(db);

        let alice = users.create("alice@example.com").await.expect("alice");
        let bob = users.create("bob@example.com").await.expect("bob");
        let alice_token = tokens.issue(alice.id).await.expect("alice token");
        let bob_token = tokens.issue(bob.id).await.expect("bob token");

        assert_ne!(alice_token.key, bob_token.key);
        assert_eq!(
            tokens.authenticate(&alice_token.key).await.expect("alice"),
            alice.id
        );
        assert_eq!(
            tokens.authenticate(&bob_token.key).await.expect("bob"),
            bob.id
        );

        let err = tokens
            .authenticate("not-a-real-token")
            .await
            .expect_err("unknown token");
        assert!(matches!(err, UserError::InvalidToken));
        let err = tokens.authenticate("").await.expect_err("empty token");
        assert!(matches!(err, UserError::InvalidToken));
    }

    #[tokio::test]
    async fn revoked_token_no_longer_authenticates() {
        let (db, _dir) = setup_db().await;
        let users = UserRepository::new(db.clone());
        let tokens = TokenRepository::new(db);

        let user = users.create("user@example.com").await.expect("create user");
        let old = tokens.issue(user.id).await.expect("issue");
        tokens.revoke(user.id).await.expect("revoke");

        let err = tokens
            .authenticate(&old.key)
            .await
            .expect_err("revoked token");
        assert!(matches!(err, UserError::InvalidToken));

        let fresh = tokens.issue(user.id).await.expect("reissue");
        assert_ne!(fresh.key, old.key);
    }
}
