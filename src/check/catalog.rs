//! Content catalog.
//!
//! Loads check and structure definitions from JSON and serves read-only
//! lookups. The engine never writes to the catalog.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::definition::CheckDefinition;
use crate::kingdom::Modifier;

/// Catalog bundled with the crate, used when no other catalog is loaded.
pub const BUILTIN_CATALOG: &str = include_str!("../../data/catalog.json");

/// Errors that can occur while loading a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate check id '{0}'")]
    DuplicateCheck(String),

    #[error("duplicate structure id '{0}'")]
    DuplicateStructure(String),
}

/// A structure that can be queued for construction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StructureDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cost: Vec<Modifier>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    checks: Vec<CheckDefinition>,
    #[serde(default)]
    structures: Vec<StructureDefinition>,
}

/// Indexed catalog of checks and structures.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    checks: Vec<CheckDefinition>,
    structures: Vec<StructureDefinition>,
    check_index: HashMap<String, usize>,
    structure_index: HashMap<String, usize>,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate ids.
    pub fn new(
        checks: Vec<CheckDefinition>,
        structures: Vec<StructureDefinition>,
    ) -> Result<Self, CatalogError> {
        let mut check_index = HashMap::with_capacity(checks.len());
        for (i, def) in checks.iter().enumerate() {
            if check_index.insert(def.id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateCheck(def.id.clone()));
            }
        }
        let mut structure_index = HashMap::with_capacity(structures.len());
        for (i, s) in structures.iter().enumerate() {
            if structure_index.insert(s.id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateStructure(s.id.clone()));
            }
        }
        Ok(Catalog {
            checks,
            structures,
            check_index,
            structure_index,
        })
    }

    /// Looks up a check definition by id.
    pub fn check(&self, id: &str) -> Option<&CheckDefinition> {
        self.check_index.get(id).map(|&i| &self.checks[i])
    }

    /// Returns the checks in `category`, in catalog order.
    pub fn actions_by_category(&self, category: &str) -> Vec<&CheckDefinition> {
        self.checks
            .iter()
            .filter(|c| c.category.as_deref() == Some(category))
            .collect()
    }

    /// Looks up a structure definition by id.
    pub fn structure(&self, id: &str) -> Option<&StructureDefinition> {
        self.structure_index.get(id).map(|&i| &self.structures[i])
    }

    pub fn checks(&self) -> &[CheckDefinition] {
        &self.checks
    }

    pub fn structures(&self) -> &[StructureDefinition] {
        &self.structures
    }
}

/// Loads a catalog from a JSON file at the given path.
pub fn load_catalog(path: &Path) -> Result<Catalog, CatalogError> {
    let data = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_catalog_from_str(&data)
}

/// Loads a catalog from a JSON string.
pub fn load_catalog_from_str(json: &str) -> Result<Catalog, CatalogError> {
    let file: CatalogFile = serde_json::from_str(json)?;
    Catalog::new(file.checks, file.structures)
}

/// Loads the bundled catalog.
pub fn builtin_catalog() -> Result<Catalog, CatalogError> {
    load_catalog_from_str(BUILTIN_CATALOG)
}
