use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Provisioning,
    Active,
    Suspended,
    Deprovisioned,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Provisioning => "provisioning",
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deprovisioned => "deprovisioned",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provisioning" => Ok(TenantStatus::Provisioning),
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "deprovisioned" => Ok(TenantStatus::Deprovisioned),
            other => Err(format!("unknown tenant status '{}'", other)),
        }
    }
}

/// Registry entry for one tenant database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tenant_id: Uuid,
    pub slug: String,
    pub database_name: String,
    pub server_ref: String,
    pub status: TenantStatus,
    pub industry: Option<String>,
    pub plan_ref: Option<String>,
}

/// Raw `tenants` row as stored in the central database
#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: Uuid,
    pub slug: String,
    pub db_name: Option<String>,
    pub server_ref: String,
    pub status: String,
    pub industry: Option<String>,
    pub plan_id: Option<String>,
}

impl TryFrom<TenantRow> for TenantRecord {
    type Error = String;

    fn try_from(row: TenantRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<TenantStatus>()?;
        let database_name = match row.db_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => default_database_name(&row.slug),
        };

        Ok(TenantRecord {
            tenant_id: row.id,
            slug: row.slug,
            database_name,
            server_ref: row.server_ref,
            status,
            industry: row.industry.filter(|i| !i.trim().is_empty()),
            plan_ref: row.plan_id,
        })
    }
}

/// Hash tenant slug to consistent database name
pub fn default_database_name(slug: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(slug.as_bytes());
    let hash_str = format!("{:x}", hasher.finalize());

    // Use first 16 characters of hash for reasonable DB name length
    format!("tenant_{}", &hash_str[..16])
}
