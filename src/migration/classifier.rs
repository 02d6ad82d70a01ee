use std::collections::BTreeSet;

use crate::migration::connection::{StatementError, StatementErrorKind};

/// Decides whether a failed statement is a harmless "already applied" conflict
pub trait ErrorClassifier: Send + Sync {
    fn is_ignorable(&self, error: &StatementError) -> bool;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&StatementError) -> bool + Send + Sync,
{
    fn is_ignorable(&self, error: &StatementError) -> bool {
        self(error)
    }
}

/// Postgres SQLSTATE codes that mean "this schema object is already there"
pub const POSTGRES_IGNORABLE_CODES: &[&str] = &[
    "42P06", // duplicate_schema
    "42P07", // duplicate_table (also indexes, sequences, views)
    "42701", // duplicate_column
    "42710", // duplicate_object (constraints, triggers, types)
    "42723", // duplicate_function
    "42P16", // invalid_table_definition: multiple primary keys
    "23505", // unique_violation on seed rows
];

/// Allowlist of backend error codes. Only database-reported errors with a
/// code can match; timeouts and connection losses never do.
#[derive(Debug, Clone, Default)]
pub struct SqlStateAllowlist {
    codes: BTreeSet<String>,
}

impl SqlStateAllowlist {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(|c| c.into().to_uppercase()).collect(),
        }
    }

    pub fn postgres() -> Self {
        Self::new(POSTGRES_IGNORABLE_CODES.iter().copied())
    }

    /// Extend the allowlist, e.g. from `MIGRATE_IGNORABLE_CODES`
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes.extend(codes.into_iter().map(|c| c.into().to_uppercase()));
        self
    }
}

impl ErrorClassifier for SqlStateAllowlist {
    fn is_ignorable(&self, error: &StatementError) -> bool {
        if error.kind != StatementErrorKind::Database {
            return false;
        }
        match &error.code {
            Some(code) => self.codes.contains(&code.to_uppercase()),
            None => false,
        }
    }
}
