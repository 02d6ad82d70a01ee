pub mod entitlement_service;
pub mod orchestrator;
pub mod tenant_directory;

pub use entitlement_service::{EntitlementError, EntitlementService};
pub use orchestrator::{FanOutOptions, FanOutSummary, OrchestratorError, TenantOrchestrator, TenantOutcome, TenantResult};
pub use tenant_directory::{DirectoryError, PgTenantDirectory, TenantDirectory, TenantFilter};
