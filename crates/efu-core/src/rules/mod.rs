pub mod error;
pub mod filter;
pub mod repositories;
pub mod types;
pub mod writer;

pub use error::{RuleError, ValidationError};
pub use filter::{RuleFilter, RuleSetFilter, parse_assigned_only, parse_rule_ids};
pub use repositories::{
    MAX_RESOLVE_ATTEMPTS, OwnerScoped, RuleRepository, RuleSetRepository, find_rule_by_fields,
    insert_rule, resolve_rule,
};
pub use types::{
    NewRuleSet, Rule, RuleChanges, RuleId, RuleReplacement, RuleSet, RuleSetChanges, RuleSetId,
    RuleSetReplacement, RuleSpec,
};
pub use writer::RuleSetWriter;
