use std::{env, future::Future, path::Path, sync::Arc, time::Duration};

use chrono::{SecondsFormat, Utc};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Database {
    inner: Arc<LibSqlDatabase>,
    local: bool,
}

/// How long a local connection waits on a locked database file.
const BUSY_TIMEOUT_MS: u32 = 5_000;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to build database: {0}")]
    Build(libsql::Error),
    #[error("failed to open connection: {0}")]
    Connect(libsql::Error),
    #[error("failed to execute statement: {0}")]
    Statement(libsql::Error),
    #[error("missing required LIBSQL_AUTH_TOKEN for remote database")]
    MissingAuthToken,
    #[error("database still unavailable after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
    #[error("gave up waiting for database")]
    WaitCancelled,
}

/// How long and how often [`Database::wait_until_ready`] polls.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub interval: Duration,
    /// `None` polls until the database answers or the wait is cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

impl Database {
    pub async fn new(database_path: &Path) -> Result<Self, DbError> {
        let path_str = database_path.to_string_lossy();
        let local = !is_remote(&path_str);
        let inner = if !local {
            let auth_token = env::var("LIBSQL_AUTH_TOKEN")
                .ok()
                .filter(|token| !token.is_empty())
                .ok_or(DbError::MissingAuthToken)?;

            Builder::new_remote(path_str.to_string(), auth_token)
                .build()
                .await
        } else {
            Builder::new_local(path_str.to_string()).build().await
        }
        .map_err(DbError::Build)?;

        Ok(Self {
            inner: Arc::new(inner),
            local,
        })
    }

    pub async fn connection(&self) -> Result<Connection, DbError> {
        let conn = self.inner.connect().map_err(DbError::Connect)?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(DbError::Statement)?;
        if self.local {
            // Returns the new value as a row, so it goes through `query`.
            let mut rows = conn
                .query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
                .await
                .map_err(DbError::Statement)?;
            rows.next().await.map_err(DbError::Statement)?;
        }
        Ok(conn)
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query("SELECT 1", ())
            .await
            .map_err(DbError::Statement)?;
        let _ = rows.next().await.map_err(DbError::Statement)?;
        Ok(())
    }

    /// Poll [`Database::health_check`] until it succeeds.
    pub async fn wait_until_ready(
        &self,
        options: WaitOptions,
        shutdown: &CancellationToken,
    ) -> Result<u32, DbError> {
        info!("waiting for database");
        wait_for(|| self.health_check(), options, shutdown).await
    }
}

/// Run `probe` until it succeeds, sleeping `options.interval` between attempts.
///
/// Returns the number of attempts it took. Fails with [`DbError::Unavailable`]
/// once `max_attempts` is exhausted and with [`DbError::WaitCancelled`] if
/// `shutdown` fires first.
pub async fn wait_for<F, Fut>(
    mut probe: F,
    options: WaitOptions,
    shutdown: &CancellationToken,
) -> Result<u32, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), DbError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match probe().await {
            Ok(()) => {
                info!(attempts, "database available");
                return Ok(attempts);
            }
            Err(err) => {
                if options.max_attempts.is_some_and(|max| attempts >= max) {
                    return Err(DbError::Unavailable {
                        attempts,
                        last_error: err.to_string(),
                    });
                }
                warn!(
                    error = %err,
                    attempts,
                    wait_ms = options.interval.as_millis() as u64,
                    "database unavailable, retrying"
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Err(DbError::WaitCancelled),
            _ = tokio::time::sleep(options.interval) => {}
        }
    }
}

pub(crate) fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string()
        .to_ascii_lowercase()
        .contains("unique constraint failed")
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn is_remote(path: &str) -> bool {
    path.starts_with("libsql://") || path.starts_with("http://") || path.starts_with("https://")
}
