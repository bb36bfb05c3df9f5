pub mod api;
pub mod config;
pub mod db;
pub mod migrations;
pub mod rules;
pub mod telemetry;
pub mod users;

pub use config::Config;
pub use db::{Database, DbError, WaitOptions};
pub use rules::{
    NewRuleSet, OwnerScoped, Rule, RuleChanges, RuleError, RuleFilter, RuleReplacement,
    RuleRepository, RuleSet, RuleSetChanges, RuleSetFilter, RuleSetReplacement, RuleSetRepository,
    RuleSetWriter, RuleSpec, ValidationError,
};
pub use telemetry::{TelemetryError, TelemetryGuard, init_logging, init_telemetry};
pub use users::{AuthToken, TokenRepository, User, UserError, UserId, UserRepository};
