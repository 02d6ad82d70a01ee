use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::server::{ServerCredential, ServerRow};
use crate::database::models::tenant::{TenantRecord, TenantRow, TenantStatus};
use crate::entitlement::plan::{PlanConfig, PlanError};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Database manager error: {0}")]
    DatabaseManager(#[from] DatabaseError),
    #[error("Invalid registry row: {0}")]
    InvalidRow(String),
    #[error("Invalid plan '{plan}': {source}")]
    InvalidPlan {
        plan: String,
        #[source]
        source: PlanError,
    },
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Which tenants a run targets. Empty `slugs` means "all matching status".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantFilter {
    pub status: Option<TenantStatus>,
    pub slugs: Vec<String>,
}

impl TenantFilter {
    pub fn active() -> Self {
        Self {
            status: Some(TenantStatus::Active),
            slugs: Vec::new(),
        }
    }

    pub fn with_slugs(mut self, slugs: Vec<String>) -> Self {
        self.slugs = slugs;
        self
    }

    pub fn matches(&self, tenant: &TenantRecord) -> bool {
        self.status.map_or(true, |s| s == tenant.status)
            && (self.slugs.is_empty() || self.slugs.iter().any(|slug| *slug == tenant.slug))
    }
}

/// Read-only view of the central tenant registry
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Tenants matching the filter, ordered by slug
    async fn list_tenants(&self, filter: &TenantFilter) -> Result<Vec<TenantRecord>, DirectoryError>;

    async fn find_tenant(&self, slug: &str) -> Result<Option<TenantRecord>, DirectoryError>;

    async fn server_credential(&self, server_ref: &str) -> Result<Option<ServerCredential>, DirectoryError>;

    async fn plan_config(&self, plan_ref: &str) -> Result<Option<PlanConfig>, DirectoryError>;
}

const TENANT_COLUMNS: &str = "id, slug, db_name, server_ref, status, industry, plan_id";

/// Tenant directory backed by the `tenants`, `servers` and `plans` tables
pub struct PgTenantDirectory {
    main_pool: PgPool,
}

impl PgTenantDirectory {
    pub async fn new() -> Result<Self, DirectoryError> {
        let main_pool = DatabaseManager::main_pool().await?;
        Ok(Self { main_pool })
    }

    fn into_record(row: TenantRow) -> Result<TenantRecord, DirectoryError> {
        let slug = row.slug.clone();
        TenantRecord::try_from(row).map_err(|e| DirectoryError::InvalidRow(format!("tenant '{}': {}", slug, e)))
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn list_tenants(&self, filter: &TenantFilter) -> Result<Vec<TenantRecord>, DirectoryError> {
        let query = format!(
            "SELECT {}
             FROM tenants
             WHERE ($1::text IS NULL OR status = $1)
               AND (cardinality($2::text[]) = 0 OR slug = ANY($2))
             ORDER BY slug",
            TENANT_COLUMNS
        );

        let rows = sqlx::query_as::<_, TenantRow>(&query)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.slugs.clone())
            .fetch_all(&self.main_pool)
            .await?;

        rows.into_iter().map(Self::into_record).collect()
    }

    async fn find_tenant(&self, slug: &str) -> Result<Option<TenantRecord>, DirectoryError> {
        let query = format!("SELECT {} FROM tenants WHERE slug = $1", TENANT_COLUMNS);

        let row = sqlx::query_as::<_, TenantRow>(&query)
            .bind(slug)
            .fetch_optional(&self.main_pool)
            .await?;

        row.map(Self::into_record).transpose()
    }

    async fn server_credential(&self, server_ref: &str) -> Result<Option<ServerCredential>, DirectoryError> {
        let row = sqlx::query_as::<_, ServerRow>(
            r#"SELECT id, host, port, "user", secret FROM servers WHERE id = $1"#,
        )
        .bind(server_ref)
        .fetch_optional(&self.main_pool)
        .await?;

        row.map(|r| ServerCredential::try_from(r).map_err(DirectoryError::InvalidRow))
            .transpose()
    }

    async fn plan_config(&self, plan_ref: &str) -> Result<Option<PlanConfig>, DirectoryError> {
        let row: Option<(Json<serde_json::Value>,)> = sqlx::query_as("SELECT config FROM plans WHERE id = $1")
            .bind(plan_ref)
            .fetch_optional(&self.main_pool)
            .await?;

        row.map(|(Json(config),)| {
            PlanConfig::from_json(config).map_err(|source| DirectoryError::InvalidPlan {
                plan: plan_ref.to_string(),
                source,
            })
        })
        .transpose()
    }
}
