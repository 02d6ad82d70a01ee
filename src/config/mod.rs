use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub migrations: MigrationConfig,
    pub fanout: FanOutConfig,
    pub entitlements: EntitlementConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub catalog_dir: PathBuf,
    pub statement_timeout_secs: u64,
    /// Extra SQLSTATE codes appended to the default ignorable allowlist
    pub extra_ignorable_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutConfig {
    pub max_concurrency: usize,
    pub per_server_concurrency: usize,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementConfig {
    pub modules_file: Option<PathBuf>,
}

impl MigrationConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs.max(1))
    }
}

impl FanOutConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Migration overrides
        if let Ok(v) = env::var("MIGRATE_CATALOG_DIR") {
            self.migrations.catalog_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("MIGRATE_STATEMENT_TIMEOUT_SECS") {
            self.migrations.statement_timeout_secs = v.parse().unwrap_or(self.migrations.statement_timeout_secs);
        }
        if let Ok(v) = env::var("MIGRATE_IGNORABLE_CODES") {
            self.migrations.extra_ignorable_codes = parse_code_list(&v);
        }

        // Fan-out overrides
        if let Ok(v) = env::var("FANOUT_MAX_CONCURRENCY") {
            self.fanout.max_concurrency = v.parse().unwrap_or(self.fanout.max_concurrency);
        }
        if let Ok(v) = env::var("FANOUT_PER_SERVER_CONCURRENCY") {
            self.fanout.per_server_concurrency = v.parse().unwrap_or(self.fanout.per_server_concurrency);
        }
        if let Ok(v) = env::var("FANOUT_CONNECT_TIMEOUT_SECS") {
            self.fanout.connect_timeout_secs = v.parse().unwrap_or(self.fanout.connect_timeout_secs);
        }

        // Entitlement overrides
        if let Ok(v) = env::var("ENTITLEMENT_MODULES_FILE") {
            self.entitlements.modules_file = if v.trim().is_empty() { None } else { Some(PathBuf::from(v)) };
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 5,
                connection_timeout: 30,
            },
            migrations: MigrationConfig {
                catalog_dir: PathBuf::from("migrations"),
                statement_timeout_secs: 120,
                extra_ignorable_codes: Vec::new(),
            },
            fanout: FanOutConfig {
                max_concurrency: 4,
                per_server_concurrency: 2,
                connect_timeout_secs: 10,
            },
            entitlements: EntitlementConfig { modules_file: None },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 10,
            },
            migrations: MigrationConfig {
                catalog_dir: PathBuf::from("migrations"),
                statement_timeout_secs: 300,
                extra_ignorable_codes: Vec::new(),
            },
            fanout: FanOutConfig {
                max_concurrency: 8,
                per_server_concurrency: 2,
                connect_timeout_secs: 10,
            },
            entitlements: EntitlementConfig { modules_file: None },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 5,
            },
            migrations: MigrationConfig {
                catalog_dir: PathBuf::from("migrations"),
                statement_timeout_secs: 600,
                extra_ignorable_codes: Vec::new(),
            },
            fanout: FanOutConfig {
                max_concurrency: 16,
                per_server_concurrency: 3,
                connect_timeout_secs: 5,
            },
            entitlements: EntitlementConfig { modules_file: None },
        }
    }
}

fn parse_code_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

// Helper macro for environment checks
#[macro_export]
macro_rules! is_development {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Development)
    };
}
