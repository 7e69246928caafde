//! Program catalog and class path.
//!
//! A worker process is built with a [`ProgramCatalog`]: named bundles of
//! class definitions. `addPaths` selects bundles by name; the selected
//! definitions form the [`ClassPath`] from which classes load lazily.

use super::builtins;
use super::class::ClassDef;
use crate::model::ClassId;
use crate::result::{ExecError, ExecResult};
use std::collections::{BTreeMap, HashMap};

/// Named bundles of class definitions available to a worker
#[derive(Debug, Clone, Default)]
pub struct ProgramCatalog {
    entries: BTreeMap<String, Vec<ClassDef>>,
}

impl ProgramCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle under `name`
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, classes: Vec<ClassDef>) -> Self {
        self.entries.insert(name.into(), classes);
        self
    }

    /// Definitions of a bundle
    pub fn resolve(&self, name: &str) -> ExecResult<&[ClassDef]> {
        self.entries
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ExecError::config(format!("unknown class path entry '{name}'")))
    }

    /// Names of all bundles
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Class definitions reachable by the loader
#[derive(Debug, Clone)]
pub struct ClassPath {
    entries: Vec<String>,
    definitions: HashMap<ClassId, ClassDef>,
}

impl Default for ClassPath {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassPath {
    /// Class path holding only the built-in `std` classes
    #[must_use]
    pub fn new() -> Self {
        let definitions = builtins::classes()
            .into_iter()
            .map(|class| (class.name.clone(), class))
            .collect();
        Self {
            entries: Vec::new(),
            definitions,
        }
    }

    /// Add bundles from the catalog; entries already present are skipped
    pub fn add_entries(&mut self, catalog: &ProgramCatalog, names: &[String]) -> ExecResult<usize> {
        let mut added = 0;
        for name in names {
            if self.entries.contains(name) {
                continue;
            }
            for class in catalog.resolve(name)? {
                if class.name.is_std() {
                    return Err(ExecError::config(format!(
                        "entry '{name}' redefines built-in class {}",
                        class.name
                    )));
                }
                self.definitions.insert(class.name.clone(), class.clone());
                added += 1;
            }
            self.entries.push(name.clone());
        }
        Ok(added)
    }

    /// Entries added so far, in order
    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Definition of a class
    #[must_use]
    pub fn find(&self, class: &ClassId) -> Option<&ClassDef> {
        self.definitions.get(class)
    }

    /// Every user (non-`std`) class on the path
    pub fn user_classes(&self) -> impl Iterator<Item = &ClassId> {
        self.definitions.keys().filter(|name| !name.is_std())
    }
}
