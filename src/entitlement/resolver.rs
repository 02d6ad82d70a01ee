use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::entitlement::modules::ModuleRegistry;
use crate::entitlement::plan::{PlanConfig, TagSet, UNLIMITED, WILDCARD};

/// Industry used when a tenant has none recorded
pub const DEFAULT_INDUSTRY: &str = "general";

static BUILTIN_REGISTRY: Lazy<Arc<ModuleRegistry>> = Lazy::new(|| Arc::new(ModuleRegistry::builtin()));

/// What a tenant may use, derived from `(industry, plan)` alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementView {
    #[serde(skip)]
    pub industry: String,
    pub modules: Vec<String>,
    pub limits: BTreeMap<String, i64>,
    pub communication: BTreeMap<String, i64>,
    pub features: Vec<String>,
    #[serde(skip)]
    industries: TagSet,
}

impl EntitlementView {
    pub fn has_module(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m == module)
    }

    /// Missing resources resolve to 0; -1 comes back untouched
    pub fn limit(&self, resource: &str) -> i64 {
        self.limits.get(resource).copied().unwrap_or(0)
    }

    pub fn communication_limit(&self, channel: &str) -> i64 {
        self.communication.get(channel).copied().unwrap_or(0)
    }

    pub fn is_unlimited(&self, resource: &str) -> bool {
        self.limit(resource) == UNLIMITED
    }

    /// Whether one more unit of `resource` fits given current usage
    pub fn allows(&self, resource: &str, current_usage: i64) -> bool {
        match self.limit(resource) {
            UNLIMITED => true,
            limit => current_usage < limit,
        }
    }

    pub fn has_feature(&self, tag: &str) -> bool {
        self.features.iter().any(|f| f == WILDCARD || f == tag)
    }

    pub fn can_use_industry(&self, tag: &str) -> bool {
        self.industries.allows(tag)
    }
}

/// Pure projection of a plan onto the module registry
#[derive(Debug, Clone)]
pub struct EntitlementResolver {
    registry: Arc<ModuleRegistry>,
}

impl EntitlementResolver {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn resolve(&self, industry: &str, plan: &PlanConfig) -> EntitlementView {
        let mut modules: Vec<String> = self.registry.general_modules().to_vec();

        // Fail closed: industry modules only when the plan names the industry
        if plan.can_use_industry(industry) {
            for module in self.registry.industry_modules(industry) {
                if !modules.contains(module) {
                    modules.push(module.clone());
                }
            }
        }

        EntitlementView {
            industry: industry.to_string(),
            modules,
            limits: plan.limits.clone(),
            communication: plan.communication_limits.clone(),
            features: plan.features.iter().map(str::to_string).collect(),
            industries: plan.industries.clone(),
        }
    }
}

impl Default for EntitlementResolver {
    fn default() -> Self {
        Self {
            registry: Arc::clone(&BUILTIN_REGISTRY),
        }
    }
}

/// Resolve against the built-in module registry
pub fn resolve(industry: &str, plan: &PlanConfig) -> EntitlementView {
    EntitlementResolver::default().resolve(industry, plan)
}
