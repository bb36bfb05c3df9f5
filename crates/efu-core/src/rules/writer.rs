//! Ruleset writes. Each call runs inside one transaction, so a failure while
//! resolving or linking any rule leaves the ruleset exactly as it was.
//!
//! Transactions start `IMMEDIATE`: concurrent writers queue on the write lock
//! instead of failing when a read lock would have to be upgraded.

use libsql::{Connection, Transaction, TransactionBehavior};

use crate::db::Database;
use crate::users::UserId;

use super::error::RuleError;
use super::repositories::{
    clear_links, get_ruleset, insert_ruleset, link_rule, resolve_rule, update_ruleset_fields,
};
use super::types::{NewRuleSet, RuleSet, RuleSetChanges, RuleSetId, RuleSetReplacement, RuleSpec};

#[derive(Clone)]
pub struct RuleSetWriter {
    db: Database,
}

impl RuleSetWriter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, user_id: UserId, new: NewRuleSet) -> Result<RuleSet, RuleError> {
        new.validate()?;

        let conn = self.db.connection().await?;
        let tx = begin(&conn).await?;
        let result = apply_create(&tx, user_id, &new).await;
        let ruleset = finish(tx, result).await?;

        tracing::info!(
            user_id,
            ruleset_id = ruleset.id,
            rules = ruleset.rules.len(),
            "created ruleset"
        );
        Ok(ruleset)
    }

    /// Present fields overwrite; `rules`, when present, replaces membership.
    pub async fn partial_update(
        &self,
        user_id: UserId,
        id: RuleSetId,
        changes: RuleSetChanges,
    ) -> Result<RuleSet, RuleError> {
        changes.validate()?;

        let conn = self.db.connection().await?;
        let tx = begin(&conn).await?;
        let result = apply_changes(&tx, user_id, id, &changes).await;
        let ruleset = finish(tx, result).await?;

        tracing::info!(
            user_id,
            ruleset_id = id,
            replaced_rules = changes.rules.is_some(),
            "updated ruleset"
        );
        Ok(ruleset)
    }

    pub async fn full_update(
        &self,
        user_id: UserId,
        id: RuleSetId,
        replacement: RuleSetReplacement,
    ) -> Result<RuleSet, RuleError> {
        self.partial_update(user_id, id, replacement.into()).await
    }
}

async fn apply_create(
    conn: &Connection,
    user_id: UserId,
    new: &NewRuleSet,
) -> Result<RuleSet, RuleError> {
    let description = new.description.as_deref().unwrap_or_default();
    let id = insert_ruleset(conn, user_id, &new.name, description).await?;
    replace_membership(conn, user_id, id, &new.rules).await?;
    get_ruleset(conn, user_id, id).await
}

async fn apply_changes(
    conn: &Connection,
    user_id: UserId,
    id: RuleSetId,
    changes: &RuleSetChanges,
) -> Result<RuleSet, RuleError> {
    update_ruleset_fields(
        conn,
        user_id,
        id,
        changes.name.as_deref(),
        changes.description.as_deref(),
    )
    .await?;

    if let Some(specs) = &changes.rules {
        replace_membership(conn, user_id, id, specs).await?;
    }
    get_ruleset(conn, user_id, id).await
}

/// Clear every link, then resolve and link each spec in order.
async fn replace_membership(
    conn: &Connection,
    user_id: UserId,
    ruleset_id: RuleSetId,
    specs: &[RuleSpec],
) -> Result<(), RuleError> {
    clear_links(conn, ruleset_id).await?;
    for spec in specs {
        let rule = resolve_rule(conn, user_id, spec).await?;
        link_rule(conn, ruleset_id, rule.id).await?;
    }
    Ok(())
}

async fn begin(conn: &Connection) -> Result<Transaction, RuleError> {
    Ok(conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .await?)
}

async fn finish<T>(tx: Transaction, result: Result<T, RuleError>) -> Result<T, RuleError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "ruleset write rollback failed");
            }
            Err(err)
        }
    }
}
