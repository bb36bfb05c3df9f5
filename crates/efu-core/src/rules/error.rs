use thiserror::Error;

use crate::db::DbError;

/// A rejected write payload or filter, with the offending field names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub fields: Vec<String>,
    pub message: String,
}

impl ValidationError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            fields: vec![field.into()],
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    /// Absent or owned by someone else; the two cases are indistinguishable.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// The unique index kept rejecting the insert but the row never became visible.
    #[error("could not resolve rule {name:?} after {attempts} attempts")]
    ConflictRetryExhausted { name: String, attempts: u32 },
}

impl RuleError {
    pub fn rule_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "rule",
            id: id.to_string(),
        }
    }

    pub fn ruleset_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            kind: "ruleset",
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
