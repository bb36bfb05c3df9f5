use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Row, params};

use crate::db::{Database, is_unique_violation, now_rfc3339};
use crate::users::UserId;

use super::error::{RuleError, ValidationError};
use super::filter::{RuleFilter, RuleSetFilter};
use super::types::{Rule, RuleChanges, RuleId, RuleSet, RuleSetId, RuleSpec};

const RULE_COLUMNS: &str = "id, user_id, name, pattern, description, created_at, updated_at";
const JOINED_RULE_COLUMNS: &str =
    "r.id, r.user_id, r.name, r.pattern, r.description, r.created_at, r.updated_at";
const RULESET_COLUMNS: &str = "id, user_id, name, description, created_at, updated_at";

/// Insert attempts before a persistent unique conflict is reported.
pub const MAX_RESOLVE_ATTEMPTS: u32 = 3;

/// Records that only their owner may read or delete.
///
/// Anything owned by another user is reported exactly like a missing record.
#[async_trait]
pub trait OwnerScoped: Send + Sync {
    type Record: Send;

    async fn get_owned(&self, user_id: UserId, id: i64) -> Result<Self::Record, RuleError>;

    async fn delete_owned(&self, user_id: UserId, id: i64) -> Result<(), RuleError>;
}

#[derive(Clone)]
pub struct RuleRepository {
    db: Database,
}

impl RuleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Owned rules ordered by name descending, then creation order.
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        filter: &RuleFilter,
    ) -> Result<Vec<Rule>, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS}
                     FROM rules
                     WHERE user_id = ?1
                       AND (?2 = 0 OR EXISTS (
                           SELECT 1
                           FROM ruleset_rules rr
                           JOIN rulesets s ON s.id = rr.ruleset_id
                           WHERE rr.rule_id = rules.id AND s.user_id = ?1
                       ))
                     ORDER BY name DESC, id ASC"
                ),
                params![user_id, filter.assigned_only as i64],
            )
            .await?;

        let mut rules = Vec::new();
        while let Some(row) = rows.next().await? {
            rules.push(row_to_rule(row)?);
        }
        Ok(rules)
    }

    pub async fn get_by_id(&self, user_id: UserId, id: RuleId) -> Result<Rule, RuleError> {
        let conn = self.db.connection().await?;
        get_rule(&conn, user_id, id).await
    }

    /// Get-or-create outside of any ruleset write.
    pub async fn resolve(&self, user_id: UserId, spec: &RuleSpec) -> Result<Rule, RuleError> {
        spec.validate("")?;
        let conn = self.db.connection().await?;
        resolve_rule(&conn, user_id, spec).await
    }

    pub async fn update(
        &self,
        user_id: UserId,
        id: RuleId,
        changes: RuleChanges,
    ) -> Result<Rule, RuleError> {
        changes.validate()?;

        let conn = self.db.connection().await?;
        let result = conn
            .execute(
                "UPDATE rules
                 SET name = COALESCE(?1, name),
                     pattern = COALESCE(?2, pattern),
                     description = COALESCE(?3, description),
                     updated_at = ?4
                 WHERE id = ?5 AND user_id = ?6",
                params![
                    changes.name,
                    changes.pattern,
                    changes.description,
                    now_rfc3339(),
                    id,
                    user_id
                ],
            )
            .await;

        match result {
            Ok(0) => Err(RuleError::rule_not_found(id)),
            Ok(_) => get_rule(&conn, user_id, id).await,
            Err(err) if is_unique_violation(&err) => Err(ValidationError {
                fields: vec!["name".into(), "pattern".into(), "description".into()],
                message: "A rule with this name, pattern and description already exists."
                    .into(),
            }
            .into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the rule and its ruleset links; the rulesets themselves stay.
    pub async fn delete(&self, user_id: UserId, id: RuleId) -> Result<(), RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "DELETE FROM rules WHERE id = ?1 AND user_id = ?2 RETURNING id",
                params![id, user_id],
            )
            .await?;

        match rows.next().await? {
            Some(_) => {
                tracing::info!(user_id, rule_id = id, "deleted rule");
                Ok(())
            }
            None => Err(RuleError::rule_not_found(id)),
        }
    }
}

#[async_trait]
impl OwnerScoped for RuleRepository {
    type Record = Rule;

    async fn get_owned(&self, user_id: UserId, id: i64) -> Result<Rule, RuleError> {
        self.get_by_id(user_id, id).await
    }

    async fn delete_owned(&self, user_id: UserId, id: i64) -> Result<(), RuleError> {
        self.delete(user_id, id).await
    }
}

#[derive(Clone)]
pub struct RuleSetRepository {
    db: Database,
}

impl RuleSetRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Owned rulesets, newest first, each with its rules attached.
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        filter: &RuleSetFilter,
    ) -> Result<Vec<RuleSet>, RuleError> {
        let rule_ids = filter
            .rule_ids
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RULESET_COLUMNS}
                     FROM rulesets
                     WHERE user_id = ?1
                       AND (?2 IS NULL OR EXISTS (
                           SELECT 1
                           FROM ruleset_rules rr
                           JOIN rules r ON r.id = rr.rule_id
                           WHERE rr.ruleset_id = rulesets.id
                             AND r.user_id = ?1
                             AND rr.rule_id IN (SELECT value FROM json_each(?2))
                       ))
                     ORDER BY id DESC"
                ),
                params![user_id, rule_ids],
            )
            .await?;

        let mut rulesets = Vec::new();
        while let Some(row) = rows.next().await? {
            rulesets.push(row_to_ruleset(row)?);
        }

        let ids: Vec<RuleSetId> = rulesets.iter().map(|ruleset| ruleset.id).collect();
        let mut members = rules_for_rulesets(&conn, &ids).await?;
        for ruleset in &mut rulesets {
            ruleset.rules = members.remove(&ruleset.id).unwrap_or_default();
        }
        Ok(rulesets)
    }

    pub async fn get_by_id(&self, user_id: UserId, id: RuleSetId) -> Result<RuleSet, RuleError> {
        let conn = self.db.connection().await?;
        get_ruleset(&conn, user_id, id).await
    }

    /// Deletes the ruleset and its links; the linked rules stay.
    pub async fn delete(&self, user_id: UserId, id: RuleSetId) -> Result<(), RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "DELETE FROM rulesets WHERE id = ?1 AND user_id = ?2 RETURNING id",
                params![id, user_id],
            )
            .await?;

        match rows.next().await? {
            Some(_) => {
                tracing::info!(user_id, ruleset_id = id, "deleted ruleset");
                Ok(())
            }
            None => Err(RuleError::ruleset_not_found(id)),
        }
    }
}

#[async_trait]
impl OwnerScoped for RuleSetRepository {
    type Record = RuleSet;

    async fn get_owned(&self, user_id: UserId, id: i64) -> Result<RuleSet, RuleError> {
        self.get_by_id(user_id, id).await
    }

    async fn delete_owned(&self, user_id: UserId, id: i64) -> Result<(), RuleError> {
        self.delete(user_id, id).await
    }
}

pub async fn get_rule(conn: &Connection, user_id: UserId, id: RuleId) -> Result<Rule, RuleError> {
    let mut rows = conn
        .query(
            &format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
        )
        .await?;

    match rows.next().await? {
        Some(row) => row_to_rule(row),
        None => Err(RuleError::rule_not_found(id)),
    }
}

/// The owner's rule matching every given field, if any.
///
/// A spec without a description matches on name and pattern alone; the
/// oldest such rule wins.
pub async fn find_rule_by_fields(
    conn: &Connection,
    user_id: UserId,
    spec: &RuleSpec,
) -> Result<Option<Rule>, RuleError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {RULE_COLUMNS}
                 FROM rules
                 WHERE user_id = ?1 AND name = ?2 AND pattern = ?3
                   AND (?4 IS NULL OR description = ?4)
                 ORDER BY id ASC
                 LIMIT 1"
            ),
            params![
                user_id,
                spec.name.as_str(),
                spec.pattern.as_str(),
                spec.description.as_deref()
            ],
        )
        .await?;

    rows.next().await?.map(row_to_rule).transpose()
}

/// Plain insert. A duplicate tuple surfaces as a unique violation.
pub async fn insert_rule(
    conn: &Connection,
    user_id: UserId,
    spec: &RuleSpec,
) -> Result<Rule, RuleError> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO rules (user_id, name, pattern, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            user_id,
            spec.name.as_str(),
            spec.pattern.as_str(),
            spec.description_or_default(),
            now
        ],
    )
    .await?;

    get_rule(conn, user_id, conn.last_insert_rowid()).await
}

/// Return the owner's rule matching `spec`, creating it when absent.
///
/// The unique index on (owner, name, pattern, description) decides races: a
/// rejected insert means someone else created the row, so look it up again.
pub async fn resolve_rule(
    conn: &Connection,
    user_id: UserId,
    spec: &RuleSpec,
) -> Result<Rule, RuleError> {
    for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
        if let Some(rule) = find_rule_by_fields(conn, user_id, spec).await? {
            return Ok(rule);
        }

        match insert_rule(conn, user_id, spec).await {
            Ok(rule) => {
                tracing::debug!(user_id, rule_id = rule.id, "created rule");
                return Ok(rule);
            }
            Err(RuleError::Sql(err)) if is_unique_violation(&err) => {
                tracing::warn!(user_id, attempt, name = %spec.name, "rule insert conflicted, retrying lookup");
            }
            Err(err) => return Err(err),
        }
    }

    Err(RuleError::ConflictRetryExhausted {
        name: spec.name.clone(),
        attempts: MAX_RESOLVE_ATTEMPTS,
    })
}

/// Idempotent: linking the same rule twice leaves one link.
pub async fn link_rule(
    conn: &Connection,
    ruleset_id: RuleSetId,
    rule_id: RuleId,
) -> Result<(), RuleError> {
    conn.execute(
        "INSERT OR IGNORE INTO ruleset_rules (ruleset_id, rule_id) VALUES (?1, ?2)",
        params![ruleset_id, rule_id],
    )
    .await?;
    Ok(())
}

pub async fn clear_links(conn: &Connection, ruleset_id: RuleSetId) -> Result<(), RuleError> {
    conn.execute(
        "DELETE FROM ruleset_rules WHERE ruleset_id = ?1",
        params![ruleset_id],
    )
    .await?;
    Ok(())
}

/// Linked rules per ruleset, each list ordered by rule id.
pub async fn rules_for_rulesets(
    conn: &Connection,
    ruleset_ids: &[RuleSetId],
) -> Result<HashMap<RuleSetId, Vec<Rule>>, RuleError> {
    let mut members: HashMap<RuleSetId, Vec<Rule>> = HashMap::new();
    if ruleset_ids.is_empty() {
        return Ok(members);
    }

    let mut rows = conn
        .query(
            &format!(
                "SELECT {JOINED_RULE_COLUMNS}, rr.ruleset_id
                 FROM ruleset_rules rr
                 JOIN rules r ON r.id = rr.rule_id
                 WHERE rr.ruleset_id IN (SELECT value FROM json_each(?1))
                 ORDER BY rr.ruleset_id, r.id"
            ),
            params![serde_json::to_string(ruleset_ids)?],
        )
        .await?;

    while let Some(row) = rows.next().await? {
        let ruleset_id: RuleSetId = row.get(7)?;
        members.entry(ruleset_id).or_default().push(row_to_rule(row)?);
    }
    Ok(members)
}

pub async fn insert_ruleset(
    conn: &Connection,
    user_id: UserId,
    name: &str,
    description: &str,
) -> Result<RuleSetId, RuleError> {
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO rulesets (user_id, name, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![user_id, name, description, now],
    )
    .await?;
    Ok(conn.last_insert_rowid())
}

/// Overwrite the given scalar fields and bump `updated_at`.
pub async fn update_ruleset_fields(
    conn: &Connection,
    user_id: UserId,
    id: RuleSetId,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<(), RuleError> {
    let updated = conn
        .execute(
            "UPDATE rulesets
             SET name = COALESCE(?1, name),
                 description = COALESCE(?2, description),
                 updated_at = ?3
             WHERE id = ?4 AND user_id = ?5",
            params![name, description, now_rfc3339(), id, user_id],
        )
        .await?;

    if updated == 0 {
        return Err(RuleError::ruleset_not_found(id));
    }
    Ok(())
}

pub async fn get_ruleset(
    conn: &Connection,
    user_id: UserId,
    id: RuleSetId,
) -> Result<RuleSet, RuleError> {
    let mut rows = conn
        .query(
            &format!("SELECT {RULESET_COLUMNS} FROM rulesets WHERE id = ?1 AND user_id = ?2"),
            params![id, user_id],
        )
        .await?;

    let mut ruleset = match rows.next().await? {
        Some(row) => row_to_ruleset(row)?,
        None => return Err(RuleError::ruleset_not_found(id)),
    };
    ruleset.rules = rules_for_rulesets(conn, &[id])
        .await?
        .remove(&id)
        .unwrap_or_default();
    Ok(ruleset)
}

fn row_to_rule(row: Row) -> Result<Rule, RuleError> {
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(Rule {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        pattern: row.get(3)?,
        description: row.get(4)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}

fn row_to_ruleset(row: Row) -> Result<RuleSet, RuleError> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;

    Ok(RuleSet {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        rules: Vec::new(),
        created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)?.with_timezone(&Utc),
    })
}
