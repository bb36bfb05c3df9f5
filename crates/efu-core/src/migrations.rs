use std::collections::HashSet;

use libsql::params;
use thiserror::Error;

use crate::db::{Database, DbError};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: "001_initial",
    sql: include_str!("../../../migrations/001_initial.sql"),
}];

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("migration failed: {0}")]
    LibSql(#[from] libsql::Error),
}

async fn apply_migrations(
    conn: &libsql::Connection,
    migrations: &[Migration],
) -> Result<(), MigrationError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
        (),
    )
    .await?;

    let mut applied = HashSet::new();
    let mut rows = conn
        .query("SELECT version FROM schema_migrations", ())
        .await?;
    while let Some(row) = rows.next().await? {
        let version: String = row.get(0)?;
        applied.insert(version);
    }

    for migration in migrations {
        if applied.contains(migration.version) {
            continue;
        }

        tracing::info!(version = migration.version, "applying migration");
        let tx = conn.transaction().await?;
        tx.execute_batch(migration.sql).await?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))",
            params![migration.version],
        )
        .await?;
        tx.commit().await?;
    }

    Ok(())
}

pub async fn run_migrations(db: &Database) -> Result<(), MigrationError> {
    let conn = db.connection().await?;
    apply_migrations(&conn, MIGRATIONS).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::{Connection, params};
    use tempfile::TempDir;

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name = ?1",
                params![name],
            )
            .await
            .expect("query sqlite_master");
        rows.next().await.expect("row result").is_some()
    }

    async fn count(conn: &Connection, sql: &str) -> i64 {
        let mut rows = conn.query(sql, ()).await.expect("query count");
        rows.next()
            .await
            .expect("row")
            .expect("row value")
            .get(0)
            .expect("count")
    }

    async fn setup_db() -> (Database, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("db.sqlite");
        let db = Database::new(&db_path).await.expect("create db");
        (db, dir)
    }

    #[tokio::test]
    async fn applies_initial_migration_and_records_version() {
        let (db, _dir) = setup_db().await;

        run_migrations(&db).await.expect("migrations succeed");

        let conn = db.connection().await.expect("open connection");
        for table in ["users", "auth_tokens", "rules", "rulesets", "ruleset_rules"] {
            assert!(table_exists(&conn, table).await, "{table} should exist");
        }

        let recorded = count(
            &conn,
            "SELECT COUNT(*) FROM schema_migrations WHERE version = '001_initial'",
        )
        .await;
        assert_eq!(recorded, 1);
    }

    #[tokio::test]
    async fn rerunning_migrations_is_idempotent() {
        let (db, _dir) = setup_db().await;

        run_migrations(&db).await.expect("initial migration");
        run_migrations(&db).await.expect("second migration");

        let conn = db.connection().await.expect("open connection");
        let recorded = count(&conn, "SELECT COUNT(*) FROM schema_migrations").await;
        assert_eq!(
            recorded,
            MIGRATIONS.len() as i64,
            "migrations should only record once each"
        );
    }

    #[tokio::test]
    async fn applied_at_is_iso_8601_utc() {
        let (db, _dir) = setup_db().await;

        run_migrations(&db).await.expect("migrations succeed");

        let conn = db.connection().await.expect("open connection");
        let mut rows = conn
            .query(
                "SELECT applied_at FROM schema_migrations WHERE version = '001_initial'",
                (),
            )
            .await
            .expect("query applied_at");
        let applied_at: String = rows
            .next()
            .await
            .expect("row")
            .expect("row value")
            .get(0)
            .expect("value");
        assert!(
            applied_at.len() >= 20 && applied_at.contains('T') && applied_at.ends_with('Z'),
            "applied_at should be ISO 8601 UTC, got {applied_at}"
        );
    }

    #[tokio::test]
    async fn migration_failure_rolls_back() {
        let (db, _dir) = setup_db().await;
        let conn = db.connection().await.expect("open connection");

        let failing_migrations = [Migration {
            version: "002_failure",
            sql: "CREATE TABLE should_not_persist(id INTEGER);\nINVALID SQL STATEMENT;",
        }];

        let err = apply_migrations(&conn, &failing_migrations)
            .await
            .expect_err("migration should fail");
        match err {
            MigrationError::LibSql(_) => {}
            other => panic!("unexpected error: {other}"),
        }

        assert!(
            !table_exists(&conn, "should_not_persist").await,
            "failed migration should roll back schema changes"
        );

        let recorded = count(
            &conn,
            "SELECT COUNT(*) FROM schema_migrations WHERE version = '002_failure'",
        )
        .await;
        assert_eq!(
            recorded, 0,
            "failed migrations should not be recorded in schema_migrations"
        );
    }

    #[tokio::test]
    async fn rules_unique_index_rejects_duplicate_tuple() {
        let (db, _dir) = setup_db().await;
        run_migrations(&db).await.expect("migrations succeed");
        let conn = db.connection().await.expect("open connection");

        conn.execute(
            "INSERT INTO users (email, created_at) VALUES ('a@example.com', '2024-01-01T00:00:00Z')",
            (),
        )
        .await
        .expect("insert user");

        let insert = "INSERT INTO rules (user_id, name, pattern, description, created_at, updated_at)
                      VALUES (1, 'Lunch', 'coffee', '', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')";
        conn.execute(insert, ()).await.expect("first insert");
        let err = conn
            .execute(insert, ())
            .await
            .expect_err("duplicate tuple should violate unique index");
        assert!(
            err.to_string()
                .to_ascii_lowercase()
                .contains("unique constraint failed"),
            "expected unique violation, got {err}"
        );
    }

    #[tokio::test]
    async fn deleting_ruleset_cascades_to_links_only() {
        let (db, _dir) = setup_db().await;
        run_migrations(&db).await.expect("migrations succeed");
        let conn = db.connection().await.expect("open connection");

        conn.execute_batch(
            "INSERT INTO users (email, created_at) VALUES ('a@example.com', '2024-01-01T00:00:00Z');
             INSERT INTO rules (user_id, name, pattern, created_at, updated_at)
                 VALUES (1, 'Lunch', 'coffee', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
             INSERT INTO rulesets (user_id, name, created_at, updated_at)
                 VALUES (1, 'Meals', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
             INSERT INTO ruleset_rules (ruleset_id, rule_id) VALUES (1, 1);
             DELETE FROM rulesets WHERE id = 1;",
        )
        .await
        .expect("seed and delete");

        assert_eq!(count(&conn, "SELECT COUNT(*) FROM ruleset_rules").await, 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM rules").await, 1);
    }
}
