//! Schema evolution for tenant and registry databases.
//!
//! A [`Catalog`] of [`MigrationUnit`]s is applied to one database at a time by
//! the [`MigrationRunner`], which keeps a per-database ledger so every unit
//! is committed exactly once. Backend specifics stay behind
//! [`SchemaConnection`] and [`ErrorClassifier`].

pub mod catalog;
pub mod classifier;
pub mod connection;
pub mod report;
pub mod runner;

pub use catalog::{Catalog, CatalogError, MigrationUnit, Scope};
pub use classifier::{ErrorClassifier, SqlStateAllowlist};
pub use connection::{ConnectError, ConnectionFactory, SchemaConnection, StatementError, StatementErrorKind};
pub use report::{FailedUnit, IgnoredStatement, MigrationReport};
pub use runner::{MigrationRunner, RunnerError};
