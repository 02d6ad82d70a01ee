use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed migration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid migration id '{0}'")]
    InvalidId(String),

    #[error("Duplicate migration id '{0}'")]
    DuplicateId(String),

    #[error("Migration '{0}' has no statements")]
    EmptyUnit(String),

    #[error("Unknown target migration '{0}'")]
    UnknownTarget(String),
}

/// Which databases a unit targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// The central registry database
    Core,
    /// Every tenant database
    #[default]
    Tenant,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Core => write!(f, "core"),
            Scope::Tenant => write!(f, "tenant"),
        }
    }
}

/// A single, identified, ordered group of schema-change statements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationUnit {
    pub id: String,
    #[serde(default)]
    pub applies_to: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub statements: Vec<String>,
}

impl MigrationUnit {
    pub fn new<I, S>(id: impl Into<String>, applies_to: Scope, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            applies_to,
            description: None,
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }
}

/// On-disk shape of a unit; the id falls back to the file stem
#[derive(Debug, Deserialize)]
struct UnitFile {
    id: Option<String>,
    #[serde(default)]
    applies_to: Scope,
    description: Option<String>,
    statements: Vec<String>,
}

/// Ordered, validated set of migration units
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    units: Vec<MigrationUnit>,
}

impl Catalog {
    /// Build a catalog from units in any order; sorts by id and validates
    pub fn new(mut units: Vec<MigrationUnit>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for unit in &units {
            validate_id(&unit.id)?;
            if !seen.insert(unit.id.as_str()) {
                return Err(CatalogError::DuplicateId(unit.id.clone()));
            }
            if unit.statements.iter().all(|s| s.trim().is_empty()) {
                return Err(CatalogError::EmptyUnit(unit.id.clone()));
            }
        }

        units.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Self { units })
    }

    /// Load every `*.yaml` / `*.yml` file below `dir`, one unit per file
    pub fn load_dir(dir: &Path) -> Result<Self, CatalogError> {
        if !dir.is_dir() {
            return Err(CatalogError::DirectoryNotFound(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        collect_unit_files(dir, &mut files)?;
        files.sort();

        let mut units = Vec::with_capacity(files.len());
        for path in files {
            units.push(read_unit_file(&path)?);
        }

        let catalog = Self::new(units)?;
        tracing::debug!("Loaded {} migration units from {}", catalog.len(), dir.display());
        Ok(catalog)
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.id.as_str()).collect()
    }

    /// Units that target the given scope, order preserved
    pub fn scoped(&self, scope: Scope) -> Catalog {
        Catalog {
            units: self.units.iter().filter(|u| u.applies_to == scope).cloned().collect(),
        }
    }

    /// Truncate to units with `id <= target`
    pub fn until(&self, target: &str) -> Result<Catalog, CatalogError> {
        if !self.units.iter().any(|u| u.id == target) {
            return Err(CatalogError::UnknownTarget(target.to_string()));
        }
        Ok(Catalog {
            units: self.units.iter().filter(|u| u.id.as_str() <= target).cloned().collect(),
        })
    }
}

fn validate_id(id: &str) -> Result<(), CatalogError> {
    if id.is_empty() || id.chars().any(|c| c.is_whitespace()) {
        return Err(CatalogError::InvalidId(id.to_string()));
    }
    Ok(())
}

fn collect_unit_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), CatalogError> {
    let entries = fs::read_dir(dir).map_err(|source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            collect_unit_files(&path, files)?;
        } else if matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")) {
            files.push(path);
        }
    }

    Ok(())
}

fn read_unit_file(path: &Path) -> Result<MigrationUnit, CatalogError> {
    let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: UnitFile = serde_yaml::from_str(&content).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let id = match file.id {
        Some(id) => id,
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    Ok(MigrationUnit {
        id,
        applies_to: file.applies_to,
        description: file.description,
        statements: file.statements,
    })
}
