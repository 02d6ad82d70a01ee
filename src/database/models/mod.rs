pub mod ledger;
pub mod server;
pub mod tenant;

pub use ledger::LedgerEntry;
pub use server::ServerCredential;
pub use tenant::{TenantRecord, TenantStatus};
