//! Selection Resolver
//!
//! Expands a user request into the closed, dependency-consistent set of
//! components that must be installed, ordered for apply.
//!
//! # Design
//!
//! - **Validate first**: every explicit id is checked before any closure work;
//!   the first failing id aborts resolution with no partial result
//! - **Fixpoint closure**: ancestors, dependencies, forced components and
//!   autodependency rules are applied until a pass adds nothing
//! - **Deterministic output**: topological order with ties broken by catalog
//!   iteration order
//! - **Pure logic**: no I/O, no side effects
//!
//! # Validation Order
//!
//! | Check | Error |
//! |-------|-------|
//! | id exists | `NotFound` |
//! | not `virtual` | `VirtualComponent` |
//! | not a `checkable_leaf_only` component with children | `MustSelectSubcomponent` |
//! | not `install_only_as_dependency` | `OnlyInstallableAsDependency` |
//!
//! # Ordering Edges
//!
//! | Edge | Meaning |
//! |------|---------|
//! | parent -> child | ancestors install first |
//! | dependency -> dependent | requirements install first |
//! | trigger -> owner | an autodependency lands after everything that fired it |
//!
//! # Autodependency Cycles
//!
//! A rule whose owner is reachable from its own trigger ids through other
//! autodependency rules can never be satisfied without the owner already
//! present. Such rules are treated as unsatisfiable: they are reported once
//! when the resolver is built and never fire.

use crate::catalog::ComponentCatalog;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Request / Result Types
// ============================================================================

/// Why a request was rejected. Each variant carries the offending id.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionError {
    #[error("Cannot install {0}. Component not found.")]
    NotFound(String),

    #[error("Cannot install {0}. Component is virtual.")]
    VirtualComponent(String),

    #[error(
        "Cannot install component {0}. Component is not checkable meaning you have to select one of the subcomponents."
    )]
    MustSelectSubcomponent(String),

    #[error("Cannot install component {0}. Component is installed only as a dependency.")]
    OnlyInstallableAsDependency(String),
}

impl SelectionError {
    /// The rejected component id
    pub fn component(&self) -> &str {
        match self {
            Self::NotFound(id)
            | Self::VirtualComponent(id)
            | Self::MustSelectSubcomponent(id)
            | Self::OnlyInstallableAsDependency(id) => id,
        }
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionRequest {
    /// Install these ids (plus everything they imply)
    Explicit(Vec<String>),
    /// Install the default set
    Default,
}

impl SelectionRequest {
    pub fn explicit<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Explicit(ids.into_iter().map(Into::into).collect())
    }
}

/// Ordered component ids: ancestors before descendants, dependencies before
/// dependents. Iterating forward is apply order; [`rollback_order`] is the
/// reverse.
///
/// [`rollback_order`]: SelectionResult::rollback_order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionResult {
    components: Vec<String>,
}

impl SelectionResult {
    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.components.iter().any(|c| c == id)
    }

    /// Position of `id` in apply order
    pub fn position(&self, id: &str) -> Option<usize> {
        self.components.iter().position(|c| c == id)
    }

    pub fn apply_order(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.components.iter().map(String::as_str)
    }

    pub fn rollback_order(&self) -> impl Iterator<Item = &str> {
        self.apply_order().rev()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.components
    }
}

/// Resolver behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverOptions {
    /// Seed explicit requests with the default set as well
    pub include_defaults_with_explicit: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            include_defaults_with_explicit: true,
        }
    }
}

/// An autodependency rule that can never fire.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CyclicRule {
    pub owner: String,
    /// Index into the owner's autodependency rules
    pub rule: usize,
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves requests against one catalog.
pub struct Resolver<'a, C: ComponentCatalog + ?Sized> {
    catalog: &'a C,
    options: ResolverOptions,
    /// Catalog iteration rank, used for tie-breaking
    rank: HashMap<&'a str, usize>,
    cyclic: BTreeSet<CyclicRule>,
}

impl<'a, C: ComponentCatalog + ?Sized> Resolver<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self::with_options(catalog, ResolverOptions::default())
    }

    pub fn with_options(catalog: &'a C, options: ResolverOptions) -> Self {
        let rank = catalog
            .ids()
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();

        let mut resolver = Self {
            catalog,
            options,
            rank,
            cyclic: BTreeSet::new(),
        };
        resolver.cyclic = resolver.find_cyclic_rules();
        resolver
    }

    /// Rules excluded from evaluation because they can only fire once their
    /// own owner is already selected
    pub fn cyclic_rules(&self) -> &BTreeSet<CyclicRule> {
        &self.cyclic
    }

    /// Resolve a request into an ordered selection.
    ///
    /// # Errors
    ///
    /// Returns the first [`SelectionError`] among the explicit ids, in request
    /// order. Nothing is resolved in that case.
    pub fn resolve(&self, request: &SelectionRequest) -> Result<SelectionResult, SelectionError> {
        let mut selected: BTreeSet<String> = BTreeSet::new();

        match request {
            SelectionRequest::Explicit(ids) => {
                for id in ids {
                    self.validate(id)?;
                }
                selected.extend(ids.iter().cloned());
                if self.options.include_defaults_with_explicit {
                    selected.extend(self.default_ids());
                }
            }
            SelectionRequest::Default => selected.extend(self.default_ids()),
        }

        let fired = self.close(&mut selected);
        let result = self.order(&selected, &fired);

        info!(
            "Resolved {} component(s): {}",
            result.len(),
            result.components().join(", ")
        );
        Ok(result)
    }

    /// Check a single explicitly requested id.
    pub fn validate(&self, id: &str) -> Result<(), SelectionError> {
        let component = self
            .catalog
            .get(id)
            .map_err(|_| SelectionError::NotFound(id.to_string()))?;
        let flags = component.flags;

        if flags.is_virtual {
            return Err(SelectionError::VirtualComponent(id.to_string()));
        }

        if flags.checkable_leaf_only {
            let has_children = self
                .catalog
                .children(id)
                .map(|c| !c.is_empty())
                .unwrap_or(false);
            if has_children {
                return Err(SelectionError::MustSelectSubcomponent(id.to_string()));
            }
        }

        if flags.install_only_as_dependency {
            return Err(SelectionError::OnlyInstallableAsDependency(id.to_string()));
        }

        Ok(())
    }

    fn default_ids(&self) -> Vec<String> {
        self.catalog
            .ids()
            .into_iter()
            .filter(|id| self.catalog.flags(id).is_ok_and(|f| f.default_selected))
            .map(str::to_string)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Closure
    // ------------------------------------------------------------------------

    /// Grow `selected` to a fixpoint. Returns the autodependency rules that
    /// fired, as (owner, rule index).
    fn close(&self, selected: &mut BTreeSet<String>) -> Vec<(String, usize)> {
        let ids = self.catalog.ids();
        let forced: Vec<&str> = ids
            .iter()
            .copied()
            .filter(|id| self.catalog.flags(id).is_ok_and(|f| f.forced))
            .collect();

        let mut fired = Vec::new();
        // Every pass but the last adds at least one component
        let max_passes = ids.len() + 1;

        for pass in 1..=max_passes {
            let before = selected.len();

            self.close_structure(selected);
            selected.extend(forced.iter().map(|id| id.to_string()));
            self.close_structure(selected);

            // Rules see the structurally closed set as it was when the pass
            // started. An owner fired in this pass must not satisfy another
            // rule before its own dependencies have been pulled in.
            let snapshot = selected.clone();
            for owner in &ids {
                if snapshot.contains(*owner) {
                    continue;
                }
                let Ok(rules) = self.catalog.auto_dependency_rules(owner) else {
                    continue;
                };
                let hit = rules.iter().enumerate().find(|(index, rule)| {
                    !self.is_cyclic(owner, *index) && rule.is_satisfied_by(&snapshot)
                });
                if let Some((index, _)) = hit {
                    debug!("Autodependency rule {} of {} fired", index, owner);
                    selected.insert(owner.to_string());
                    fired.push((owner.to_string(), index));
                }
            }

            if selected.len() == before {
                debug!("Selection closed after {} pass(es)", pass);
                break;
            }
        }

        fired
    }

    /// Add ancestors and dependencies (with their ancestors) transitively.
    fn close_structure(&self, selected: &mut BTreeSet<String>) {
        let mut pending: Vec<String> = selected.iter().cloned().collect();

        while let Some(id) = pending.pop() {
            if let Ok(ancestors) = self.catalog.ancestors(&id) {
                for ancestor in ancestors {
                    if selected.insert(ancestor.to_string()) {
                        pending.push(ancestor.to_string());
                    }
                }
            }

            let Ok(dependencies) = self.catalog.dependencies(&id) else {
                continue;
            };
            for dependency in dependencies {
                if self.catalog.get(dependency).is_err() {
                    warn!("{} depends on unknown component {}, skipping", id, dependency);
                    continue;
                }
                if selected.insert(dependency.clone()) {
                    pending.push(dependency.clone());
                }
            }
        }
    }

    fn is_cyclic(&self, owner: &str, rule: usize) -> bool {
        self.cyclic.contains(&CyclicRule {
            owner: owner.to_string(),
            rule,
        })
    }

    fn find_cyclic_rules(&self) -> BTreeSet<CyclicRule> {
        let mut cyclic = BTreeSet::new();

        for owner in self.catalog.ids() {
            let Ok(rules) = self.catalog.auto_dependency_rules(owner) else {
                continue;
            };
            for (index, rule) in rules.iter().enumerate() {
                if self.reaches(rule.triggers.iter().map(String::as_str), owner) {
                    warn!(
                        "Autodependency rule {} of {} depends on its own owner and will never fire",
                        index, owner
                    );
                    cyclic.insert(CyclicRule {
                        owner: owner.to_string(),
                        rule: index,
                    });
                }
            }
        }

        cyclic
    }

    /// Walk trigger -> trigger edges from `start`, looking for `target`.
    fn reaches<'b>(&self, start: impl Iterator<Item = &'b str>, target: &str) -> bool {
        let mut stack: Vec<String> = start.map(str::to_string).collect();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Ok(rules) = self.catalog.auto_dependency_rules(&id) {
                stack.extend(rules.iter().flat_map(|r| r.triggers.iter().cloned()));
            }
        }

        false
    }

    // ------------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------------

    /// Kahn's algorithm over the selected set, smallest catalog rank first.
    fn order(&self, selected: &BTreeSet<String>, fired: &[(String, usize)]) -> SelectionResult {
        let mut nodes: Vec<&str> = selected.iter().map(String::as_str).collect();
        nodes.sort_by_key(|id| (self.rank.get(id).copied().unwrap_or(usize::MAX), *id));
        let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        let mut add_edge = |from: &str, to: &str| {
            if let (Some(&f), Some(&t)) = (index.get(from), index.get(to)) {
                if f != t {
                    successors[f].insert(t);
                }
            }
        };

        for &id in &nodes {
            if let Ok(ancestors) = self.catalog.ancestors(id) {
                if let Some(&parent) = ancestors.last() {
                    add_edge(parent, id);
                }
            }
            if let Ok(dependencies) = self.catalog.dependencies(id) {
                for dependency in dependencies {
                    add_edge(dependency.as_str(), id);
                }
            }
        }
        for (owner, rule) in fired {
            if let Ok(rules) = self.catalog.auto_dependency_rules(owner) {
                if let Some(rule) = rules.get(*rule) {
                    for trigger in &rule.triggers {
                        add_edge(trigger.as_str(), owner.as_str());
                    }
                }
            }
        }

        let mut indegree = vec![0usize; nodes.len()];
        for targets in &successors {
            for &t in targets {
                indegree[t] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
        let mut emitted = vec![false; nodes.len()];
        let mut components = Vec::with_capacity(nodes.len());

        while components.len() < nodes.len() {
            let next = match ready.pop_first() {
                Some(next) => next,
                None => {
                    // Dependency cycle in the catalog: release the lowest-ranked
                    // remaining component so the order stays deterministic.
                    let Some(stuck) = (0..nodes.len()).find(|&i| !emitted[i]) else {
                        break;
                    };
                    warn!("Dependency cycle involving {}, ordering it by catalog rank", nodes[stuck]);
                    stuck
                }
            };
            if emitted[next] {
                continue;
            }
            emitted[next] = true;
            components.push(nodes[next].to_string());

            for &t in &successors[next] {
                indegree[t] = indegree[t].saturating_sub(1);
                if indegree[t] == 0 && !emitted[t] {
                    ready.insert(t);
                }
            }
        }

        SelectionResult { components }
    }
}

// ============================================================================
// Tests
// ============================================================================
