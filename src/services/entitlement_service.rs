use std::sync::Arc;

use thiserror::Error;

use crate::entitlement::resolver::{EntitlementResolver, EntitlementView, DEFAULT_INDUSTRY};
use crate::services::tenant_directory::{DirectoryError, TenantDirectory};

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("Tenant '{0}' not found")]
    TenantNotFound(String),

    #[error("Tenant '{0}' has no plan assigned")]
    NoPlanAssigned(String),

    #[error("Plan '{plan}' for tenant '{tenant}' not found")]
    PlanNotFound { tenant: String, plan: String },

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Looks up a tenant's industry and plan in the directory and resolves the
/// entitlement view for them. Nothing is cached.
pub struct EntitlementService {
    directory: Arc<dyn TenantDirectory>,
    resolver: EntitlementResolver,
}

impl EntitlementService {
    pub fn new(directory: Arc<dyn TenantDirectory>, resolver: EntitlementResolver) -> Self {
        Self { directory, resolver }
    }

    pub async fn for_tenant(&self, slug: &str) -> Result<EntitlementView, EntitlementError> {
        let tenant = self
            .directory
            .find_tenant(slug)
            .await?
            .ok_or_else(|| EntitlementError::TenantNotFound(slug.to_string()))?;

        let plan_ref = tenant
            .plan_ref
            .as_deref()
            .ok_or_else(|| EntitlementError::NoPlanAssigned(slug.to_string()))?;

        let plan = self
            .directory
            .plan_config(plan_ref)
            .await?
            .ok_or_else(|| EntitlementError::PlanNotFound {
                tenant: slug.to_string(),
                plan: plan_ref.to_string(),
            })?;

        let industry = tenant.industry.as_deref().unwrap_or(DEFAULT_INDUSTRY);
        tracing::debug!("Resolving entitlements for {} (industry={}, plan={})", slug, industry, plan_ref);

        Ok(self.resolver.resolve(industry, &plan))
    }
}
