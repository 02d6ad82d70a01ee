//! Plan entitlements: which modules, features and limits a tenant gets for
//! its industry and subscription plan. Everything here is pure and cheap, so
//! views are recomputed per request instead of cached.

pub mod modules;
pub mod plan;
pub mod resolver;

pub use modules::ModuleRegistry;
pub use plan::{PlanConfig, PlanError, TagSet, UNLIMITED, WILDCARD};
pub use resolver::{resolve, EntitlementResolver, EntitlementView, DEFAULT_INDUSTRY};
