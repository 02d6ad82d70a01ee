use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag that matches every industry or feature
pub const WILDCARD: &str = "*";

/// Limit value meaning "no numeric cap"; distinct from `0`, "no allowance"
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Malformed plan configuration: {0}")]
    Parse(String),

    #[error("Invalid limit for '{resource}': {value} (use -1 for unlimited)")]
    InvalidLimit { resource: String, value: i64 },
}

/// Set of tags where `"*"` stands for everything. Accepts a list or the bare
/// string `"*"` when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "TagSetRepr", into = "Vec<String>")]
pub struct TagSet(BTreeSet<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum TagSetRepr {
    One(String),
    Many(Vec<String>),
}

impl From<TagSetRepr> for TagSet {
    fn from(repr: TagSetRepr) -> Self {
        match repr {
            TagSetRepr::One(tag) => TagSet::new([tag]),
            TagSetRepr::Many(tags) => TagSet::new(tags),
        }
    }
}

impl From<TagSet> for Vec<String> {
    fn from(set: TagSet) -> Self {
        set.0.into_iter().collect()
    }
}

impl TagSet {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagSet(
            tags.into_iter()
                .map(|t| t.into().trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.contains(WILDCARD)
    }

    /// Wildcard or literal membership
    pub fn allows(&self, tag: &str) -> bool {
        self.is_wildcard() || self.0.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Subscription plan capabilities; immutable per plan version
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default)]
    pub limits: BTreeMap<String, i64>,
    #[serde(default)]
    pub industries: TagSet,
    #[serde(default, alias = "communicationLimits")]
    pub communication_limits: BTreeMap<String, i64>,
    #[serde(default)]
    pub features: TagSet,
}

impl PlanConfig {
    /// Parse and validate a plan stored as JSON
    pub fn from_json(value: serde_json::Value) -> Result<Self, PlanError> {
        let plan: PlanConfig = serde_json::from_value(value).map_err(|e| PlanError::Parse(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, PlanError> {
        let plan: PlanConfig = serde_yaml::from_str(raw).map_err(|e| PlanError::Parse(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Limits below the unlimited sentinel are rejected, never clamped
    pub fn validate(&self) -> Result<(), PlanError> {
        for (resource, value) in self.limits.iter().chain(self.communication_limits.iter()) {
            if *value < UNLIMITED {
                return Err(PlanError::InvalidLimit {
                    resource: resource.clone(),
                    value: *value,
                });
            }
        }
        Ok(())
    }

    /// Configured limit; an absent resource has no allowance
    pub fn limit(&self, resource: &str) -> i64 {
        self.limits.get(resource).copied().unwrap_or(0)
    }

    pub fn communication_limit(&self, channel: &str) -> i64 {
        self.communication_limits.get(channel).copied().unwrap_or(0)
    }

    pub fn has_feature(&self, tag: &str) -> bool {
        self.features.allows(tag)
    }

    pub fn can_use_industry(&self, tag: &str) -> bool {
        self.industries.allows(tag)
    }
}
