#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crm_tenancy::database::DatabaseManager;
use sqlx::{Connection, Executor, PgConnection};
use uuid::Uuid;

/// Catalog directory shipped with the crate
pub fn shipped_catalog() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

pub fn demo_file(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

/// Throwaway catalog directory, removed on drop
pub struct TempCatalog {
    pub root: PathBuf,
}

impl TempCatalog {
    pub fn new() -> Result<Self> {
        let root = std::env::temp_dir().join(format!("crm_catalog_{}", Uuid::new_v4().simple()));
        fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
        Ok(Self { root })
    }

    /// Write `content` to `relative` below the root, creating subdirectories
    pub fn write(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

impl Drop for TempCatalog {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

/// Registry URL, or None when database-backed tests should be skipped
pub fn database_url() -> Option<String> {
    let _ = dotenvy::dotenv();
    std::env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty())
}

/// Scratch database on the registry server, dropped by `drop_scratch_database`
pub async fn create_scratch_database(base_url: &str) -> Result<(String, String)> {
    let name = format!("crm_test_{}", Uuid::new_v4().simple());
    let mut admin = PgConnection::connect(base_url).await.context("cannot reach DATABASE_URL")?;
    admin.execute(format!("CREATE DATABASE {}", name).as_str()).await?;
    admin.close().await?;

    let url = DatabaseManager::build_connection_string(&name)?;
    Ok((name, url))
}

pub async fn drop_scratch_database(base_url: &str, name: &str) -> Result<()> {
    let mut admin = PgConnection::connect(base_url).await?;
    admin
        .execute(format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", name).as_str())
        .await?;
    admin.close().await?;
    Ok(())
}
