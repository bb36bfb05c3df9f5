use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::users::UserId;

use super::error::ValidationError;

pub type RuleId = i64;
pub type RuleSetId = i64;

/// Longest accepted `name`/`pattern`.
pub const MAX_FIELD_LENGTH: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub user_id: UserId,
    pub name: String,
    pub pattern: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    /// Whether `spec` resolves to this rule. An absent description matches any.
    pub fn matches(&self, spec: &RuleSpec) -> bool {
        self.name == spec.name
            && self.pattern == spec.pattern
            && spec
                .description
                .as_deref()
                .is_none_or(|description| self.description == description)
    }
}

/// Unvalidated `{name, pattern, description?}` tuple from a write payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl RuleSpec {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Stored description for a newly created rule. Absent means empty.
    pub fn description_or_default(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Check required fields; `path` prefixes the reported field names.
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        validate_required(&format!("{path}name"), &self.name)?;
        validate_required(&format!("{path}pattern"), &self.pattern)
    }
}

/// Partial update of a single rule. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RuleChanges {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            validate_required("name", name)?;
        }
        if let Some(pattern) = &self.pattern {
            validate_required("pattern", pattern)?;
        }
        Ok(())
    }
}

/// Full replacement of a rule. An omitted description keeps the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleReplacement {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<RuleReplacement> for RuleChanges {
    fn from(replacement: RuleReplacement) -> Self {
        Self {
            name: Some(replacement.name),
            pattern: Some(replacement.pattern),
            description: replacement.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: RuleSetId,
    pub user_id: UserId,
    pub name: String,
    pub description: String,
    /// Linked rules, ordered by rule id.
    pub rules: Vec<Rule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRuleSet {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl NewRuleSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_required("name", &self.name)?;
        validate_specs(&self.rules)
    }
}

/// Changes applied by a ruleset update.
///
/// `rules: Some(..)` replaces the whole membership, even when empty. An
/// explicit `"rules": null` fails to deserialize rather than reading as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "present_rules")]
    pub rules: Option<Vec<RuleSpec>>,
}

impl RuleSetChanges {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            validate_required("name", name)?;
        }
        match &self.rules {
            Some(specs) => validate_specs(specs),
            None => Ok(()),
        }
    }
}

/// Full replacement of a ruleset. A missing `rules` list clears membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetReplacement {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl From<RuleSetReplacement> for RuleSetChanges {
    fn from(replacement: RuleSetReplacement) -> Self {
        Self {
            name: Some(replacement.name),
            description: Some(replacement.description),
            rules: Some(replacement.rules),
        }
    }
}

fn present_rules<'de, D>(deserializer: D) -> Result<Option<Vec<RuleSpec>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Vec<RuleSpec>>::deserialize(deserializer)? {
        Some(specs) => Ok(Some(specs)),
        None => Err(de::Error::custom("This field may not be null.")),
    }
}

fn validate_specs(specs: &[RuleSpec]) -> Result<(), ValidationError> {
    specs
        .iter()
        .enumerate()
        .try_for_each(|(idx, spec)| spec.validate(&format!("rules[{idx}].")))
}

fn validate_required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::field(field, "This field may not be blank."));
    }
    if value.chars().count() > MAX_FIELD_LENGTH {
        return Err(ValidationError::field(
            field,
            format!("Ensure this field has no more than {MAX_FIELD_LENGTH} characters."),
        ));
    }
    Ok(())
}
