//! Response bodies for the HTTP API.
//!
//! Ownership and timestamps stay server-side; clients only see the fields
//! they can write.

use serde::{Deserialize, Serialize};

use crate::rules::{Rule, RuleId, RuleSet, RuleSetId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleResponse {
    pub id: RuleId,
    pub name: String,
    pub pattern: String,
    pub description: String,
}

impl From<Rule> for RuleResponse {
    fn from(rule: Rule) -> Self {
        Self {
            id: rule.id,
            name: rule.name,
            pattern: rule.pattern,
            description: rule.description,
        }
    }
}

/// A ruleset with its rules nested in full, ordered by rule id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetResponse {
    pub id: RuleSetId,
    pub name: String,
    pub description: String,
    pub rules: Vec<RuleResponse>,
}

impl From<RuleSet> for RuleSetResponse {
    fn from(ruleset: RuleSet) -> Self {
        Self {
            id: ruleset.id,
            name: ruleset.name,
            description: ruleset.description,
            rules: ruleset.rules.into_iter().map(RuleResponse::from).collect(),
        }
    }
}
