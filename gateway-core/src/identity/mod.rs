//! Component C: model-keyed rewrite of request headers and body to satisfy
//! an impersonation-sensitive upstream's validation rules.

mod catalog;
mod normalize;
mod rules;

pub use catalog::IdentityCatalog;
pub use normalize::{normalize, select_rule};
pub use rules::{built_in_rules, ModelRule, ThinkingConfig};
