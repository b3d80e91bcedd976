//! Component catalog.
//!
//! The resolver only ever talks to a catalog through the read-only
//! [`ComponentCatalog`] trait. [`Catalog`] is the in-memory implementation
//! shipped with the crate; it is built once, validated up front, and never
//! mutated afterwards.
//!
//! Component ids are dot-delimited paths. `F.sub2.subsub2` is a child of
//! `F.sub2`, which is a child of `F`. Every prefix of an id must itself be a
//! component in the catalog.

use crate::types::ComponentFlags;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while building or querying a catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Component {0} not found in catalog")]
    NotFound(String),

    #[error("Component {0} is declared more than once")]
    DuplicateId(String),

    #[error("Invalid component id {0:?} (empty path segment)")]
    InvalidId(String),

    #[error("Component {id} has no parent component {parent}")]
    MissingParent { id: String, parent: String },

    #[error("Component {component} depends on unknown component {dependency}")]
    UnknownDependency {
        component: String,
        dependency: String,
    },

    #[error("Component {component} has an autodependency on unknown component {trigger}")]
    UnknownTrigger { component: String, trigger: String },

    #[error("Component {0} has an autodependency rule with no trigger ids")]
    EmptyRule(String),
}

/// Selects the owning component once every trigger id is selected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutoDependencyRule {
    pub triggers: BTreeSet<String>,
}

impl AutoDependencyRule {
    pub fn new<I, S>(triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            triggers: triggers.into_iter().map(Into::into).collect(),
        }
    }

    /// True once every trigger is contained in `selected`
    pub fn is_satisfied_by(&self, selected: &BTreeSet<String>) -> bool {
        self.triggers.iter().all(|t| selected.contains(t))
    }
}

/// An installable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(flatten)]
    pub flags: ComponentFlags,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub auto_dependencies: Vec<AutoDependencyRule>,
}

impl Component {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            flags: ComponentFlags::default(),
            dependencies: Vec::new(),
            auto_dependencies: Vec::new(),
        }
    }

    pub fn virtual_component(mut self) -> Self {
        self.flags.is_virtual = true;
        self
    }

    pub fn checkable_leaf_only(mut self) -> Self {
        self.flags.checkable_leaf_only = true;
        self
    }

    pub fn forced(mut self) -> Self {
        self.flags.forced = true;
        self
    }

    pub fn default_selected(mut self) -> Self {
        self.flags.default_selected = true;
        self
    }

    pub fn install_only_as_dependency(mut self) -> Self {
        self.flags.install_only_as_dependency = true;
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn auto_depends_on<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auto_dependencies.push(AutoDependencyRule::new(triggers));
        self
    }

    /// Id of the direct parent, if this is a nested component
    pub fn parent_id(&self) -> Option<&str> {
        parent_of(&self.id)
    }
}

/// Returns the parent path of a dotted id (`F.sub2` for `F.sub2.subsub2`).
pub fn parent_of(id: &str) -> Option<&str> {
    id.rsplit_once('.').map(|(parent, _)| parent)
}

/// Read-only view of the installable components.
///
/// Implementations must be side-effect free: the resolver may call any method
/// any number of times and expects identical answers for the lifetime of a
/// transaction.
pub trait ComponentCatalog {
    /// Look up a component by id
    fn get(&self, id: &str) -> Result<&Component, CatalogError>;

    /// All component ids in iteration order. This order breaks ties when
    /// the resolver orders its output.
    fn ids(&self) -> Vec<&str>;

    /// Direct children of `id`, in iteration order
    fn children(&self, id: &str) -> Result<Vec<&str>, CatalogError>;

    /// Ancestor chain of `id`, root first, excluding `id` itself
    fn ancestors(&self, id: &str) -> Result<Vec<&str>, CatalogError>;

    fn flags(&self, id: &str) -> Result<ComponentFlags, CatalogError> {
        Ok(self.get(id)?.flags)
    }

    fn dependencies(&self, id: &str) -> Result<&[String], CatalogError> {
        Ok(&self.get(id)?.dependencies)
    }

    fn auto_dependency_rules(&self, id: &str) -> Result<&[AutoDependencyRule], CatalogError> {
        Ok(&self.get(id)?.auto_dependencies)
    }
}

/// On-disk catalog description
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    components: Vec<Component>,
}

/// In-memory, validated component catalog ordered by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    components: BTreeMap<String, Component>,
    children: BTreeMap<String, Vec<String>>,
}

impl Catalog {
    /// Build a catalog, rejecting duplicate ids, orphaned nested ids and
    /// references to components that do not exist.
    pub fn new(components: impl IntoIterator<Item = Component>) -> Result<Self, CatalogError> {
        let mut by_id = BTreeMap::new();
        for component in components {
            if component.id.is_empty() || component.id.split('.').any(str::is_empty) {
                return Err(CatalogError::InvalidId(component.id));
            }
            if by_id.contains_key(&component.id) {
                return Err(CatalogError::DuplicateId(component.id));
            }
            by_id.insert(component.id.clone(), component);
        }

        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for component in by_id.values() {
            if let Some(parent) = component.parent_id() {
                if !by_id.contains_key(parent) {
                    return Err(CatalogError::MissingParent {
                        id: component.id.clone(),
                        parent: parent.to_string(),
                    });
                }
                children
                    .entry(parent.to_string())
                    .or_default()
                    .push(component.id.clone());
            }

            for dependency in &component.dependencies {
                if !by_id.contains_key(dependency) {
                    return Err(CatalogError::UnknownDependency {
                        component: component.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }

            for rule in &component.auto_dependencies {
                if rule.triggers.is_empty() {
                    return Err(CatalogError::EmptyRule(component.id.clone()));
                }
                if let Some(trigger) = rule.triggers.iter().find(|t| !by_id.contains_key(*t)) {
                    return Err(CatalogError::UnknownTrigger {
                        component: component.id.clone(),
                        trigger: trigger.clone(),
                    });
                }
            }
        }

        Ok(Self {
            components: by_id,
            children,
        })
    }

    /// Parse a catalog from its JSON description
    ///
    /// Malformed JSON is reported as [`InstallKitError::Json`], a well-formed
    /// but inconsistent catalog as [`InstallKitError::Catalog`].
    ///
    /// [`InstallKitError::Json`]: crate::InstallKitError::Json
    /// [`InstallKitError::Catalog`]: crate::InstallKitError::Catalog
    pub fn from_json_str(json: &str) -> crate::error::Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Self::new(file.components)?)
    }

    /// Load a catalog from a JSON description file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read catalog from {:?}", path.as_ref()))?;

        Self::from_json_str(&content)
            .with_context(|| format!("Invalid catalog {:?}", path.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }
}

impl ComponentCatalog for Catalog {
    fn get(&self, id: &str) -> Result<&Component, CatalogError> {
        self.components
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    fn ids(&self) -> Vec<&str> {
        self.components.keys().map(String::as_str).collect()
    }

    fn children(&self, id: &str) -> Result<Vec<&str>, CatalogError> {
        self.get(id)?;
        Ok(self
            .children
            .get(id)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default())
    }

    fn ancestors(&self, id: &str) -> Result<Vec<&str>, CatalogError> {
        let mut chain = Vec::new();
        let mut current = parent_of(self.get(id)?.id.as_str());
        while let Some(parent) = current {
            chain.push(self.get(parent)?.id.as_str());
            current = parent_of(parent);
        }
        chain.reverse();
        Ok(chain)
    }
}
