//! Query-string filters for the rule and ruleset listings.
//!
//! Parsing is strict: a malformed value rejects the whole request rather than
//! silently dropping the filter.

use super::error::ValidationError;
use super::types::RuleId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleFilter {
    /// Only rules linked to at least one ruleset.
    pub assigned_only: bool,
}

impl RuleFilter {
    pub fn parse(assigned_only: Option<&str>) -> Result<Self, ValidationError> {
        Ok(Self {
            assigned_only: parse_assigned_only(assigned_only)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSetFilter {
    /// Only rulesets containing any of these rules. `None` means no filter.
    pub rule_ids: Option<Vec<RuleId>>,
}

impl RuleSetFilter {
    pub fn parse(rules: Option<&str>) -> Result<Self, ValidationError> {
        Ok(Self {
            rule_ids: parse_rule_ids(rules)?,
        })
    }
}

/// `1` enables the filter, `0` or absence disables it.
pub fn parse_assigned_only(raw: Option<&str>) -> Result<bool, ValidationError> {
    match raw.map(str::trim) {
        None | Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(ValidationError::field(
            "assigned_only",
            format!("Expected 0 or 1, got {other:?}."),
        )),
    }
}

/// Comma-separated rule ids. An empty value means no filter.
pub fn parse_rule_ids(raw: Option<&str>) -> Result<Option<Vec<RuleId>>, ValidationError> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(None),
    };

    raw.split(',')
        .map(|token| {
            let token = token.trim();
            token.parse::<RuleId>().map_err(|_| {
                ValidationError::field("rules", format!("{token:?} is not a valid rule id."))
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigned_only_accepts_zero_and_one() {
        assert!(!parse_assigned_only(None).expect("absent"));
        assert!(!parse_assigned_only(Some("0")).expect("zero"));
        assert!(parse_assigned_only(Some("1")).expect("one"));
        assert!(parse_assigned_only(Some(" 1 ")).expect("padded"));
    }

    #[test]
    fn assigned_only_rejects_other_values() {
        for raw in ["2", "true", "", "yes"] {
            let err = parse_assigned_only(Some(raw)).expect_err(raw);
            assert_eq!(err.fields, vec!["assigned_only".to_string()]);
        }
    }

    #[test]
    fn rule_ids_are_trimmed_integers() {
        assert_eq!(
            parse_rule_ids(Some("3, 7 ,11")).expect("ids"),
            Some(vec![3, 7, 11])
        );
        assert_eq!(parse_rule_ids(Some("42")).expect("single"), Some(vec![42]));
    }

    #[test]
    fn empty_rule_ids_mean_no_filter() {
        assert_eq!(parse_rule_ids(None).expect("absent"), None);
        assert_eq!(parse_rule_ids(Some("")).expect("empty"), None);
        assert_eq!(parse_rule_ids(Some("  ")).expect("blank"), None);
    }

    #[test]
    fn any_bad_token_fails_the_whole_filter() {
        for raw in ["1,abc", "1,,2", "x", "1.5"] {
            let err = parse_rule_ids(Some(raw)).expect_err(raw);
            assert_eq!(err.fields, vec!["rules".to_string()]);
        }
    }

    #[test]
    fn filters_parse_from_query_values() {
        assert_eq!(
            RuleFilter::parse(Some("1")).expect("rule filter"),
            RuleFilter {
                assigned_only: true
            }
        );
        assert_eq!(
            RuleSetFilter::parse(Some("5,6")).expect("ruleset filter"),
            RuleSetFilter {
                rule_ids: Some(vec![5, 6])
            }
        );
    }
}
