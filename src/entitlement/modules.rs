use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entitlement::plan::PlanError;

/// Which product modules exist: a general set every tenant gets, plus one
/// set per industry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRegistry {
    pub general: Vec<String>,
    #[serde(default)]
    pub industries: BTreeMap<String, Vec<String>>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ModuleRegistry {
    pub fn builtin() -> Self {
        let mut industries = BTreeMap::new();
        industries.insert("agency".to_string(), owned(&["projects", "clients", "timesheets", "proposals"]));
        industries.insert("ecommerce".to_string(), owned(&["products", "orders", "inventory", "coupons"]));
        industries.insert("education".to_string(), owned(&["courses", "students", "enrollments"]));
        industries.insert("fitness".to_string(), owned(&["memberships", "classes", "trainers"]));
        industries.insert("healthcare".to_string(), owned(&["patients", "appointments", "prescriptions"]));
        industries.insert("real_estate".to_string(), owned(&["properties", "listings", "viewings"]));
        industries.insert("restaurant".to_string(), owned(&["menu", "reservations", "tables"]));

        Self {
            general: owned(&[
                "dashboard", "contacts", "companies", "deals", "tasks", "calendar", "invoices", "reports",
                "settings",
            ]),
            industries,
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, PlanError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| PlanError::Parse(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_str(&raw).map_err(|e| PlanError::Parse(format!("{}: {}", path.display(), e)))
    }

    pub fn general_modules(&self) -> &[String] {
        &self.general
    }

    /// Industry-specific modules; empty for unknown industries
    pub fn industry_modules(&self, industry: &str) -> &[String] {
        self.industries.get(industry).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
