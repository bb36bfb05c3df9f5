//! Wire types shared by the server and its tests.

pub mod types;

pub use types::{RuleResponse, RuleSetResponse};
