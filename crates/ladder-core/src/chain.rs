use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::id::ProgressionId;
use crate::progression::ProgressionType;
use crate::state::EntityProgressionState;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Configuration errors found while building a chain graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("duplicate progression type id '{0}'")]
    DuplicateId(String),

    #[error("progression type '{id}' follows unknown type '{follows}'")]
    DanglingFollows { id: String, follows: String },

    #[error("progression type '{id}' follows rejected type '{follows}'")]
    FollowsRejected { id: String, follows: String },

    /// Every id that could not be ordered: the cycle members and anything
    /// that (transitively) follows them.
    #[error("cycle detected among progression types: {}", ids.join(", "))]
    Cycle { ids: Vec<String> },

    #[error("progression type '{id}' scales with invalid type '{scale_with}'")]
    InvalidScaling { id: String, scale_with: String },
}

impl ChainError {
    /// Type ids this error rejects.
    pub fn implicated(&self) -> Vec<&str> {
        match self {
            ChainError::DuplicateId(id) => vec![id.as_str()],
            ChainError::DanglingFollows { id, .. }
            | ChainError::FollowsRejected { id, .. }
            | ChainError::InvalidScaling { id, .. } => vec![id.as_str()],
            ChainError::Cycle { ids } => ids.iter().map(String::as_str).collect(),
        }
    }
}

/// Introspection totals for listing commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSummary {
    pub total: usize,
    pub enabled: usize,
    pub order: Vec<String>,
    pub base: Option<String>,
    pub highest: Option<String>,
}

// ---------------------------------------------------------------------------
// ChainGraph
// ---------------------------------------------------------------------------

/// Validated forest of progression types with a cached topological order.
///
/// [`ProgressionId`]s index `types` in declaration order. The topological
/// order breaks ties by declaration order, so identical input always yields
/// the identical order.
#[derive(Debug, Clone, Default)]
pub struct ChainGraph {
    types: Vec<ProgressionType>,
    index: HashMap<String, ProgressionId>,
    parent: Vec<Option<ProgressionId>>,
    children: Vec<Vec<ProgressionId>>,
    order: Vec<ProgressionId>,
    /// Position of each id inside `order`.
    position: Vec<usize>,
}

impl ChainGraph {
    /// Build a graph, failing on the first class of configuration error.
    pub fn build(defs: Vec<ProgressionType>) -> Result<ChainGraph, ChainError> {
        let mut index: HashMap<String, ProgressionId> = HashMap::with_capacity(defs.len());
        for (i, def) in defs.iter().enumerate() {
            if index.insert(def.id.clone(), ProgressionId(i as u32)).is_some() {
                return Err(ChainError::DuplicateId(def.id.clone()));
            }
        }

        let mut parent = Vec::with_capacity(defs.len());
        for def in &defs {
            match &def.follows {
                None => parent.push(None),
                Some(follows) => match index.get(follows) {
                    Some(&pid) => parent.push(Some(pid)),
                    None => {
                        return Err(ChainError::DanglingFollows {
                            id: def.id.clone(),
                            follows: follows.clone(),
                        });
                    }
                },
            }
        }

        let order = kahn_order(&parent);
        if order.len() != defs.len() {
            let ordered: HashSet<ProgressionId> = order.iter().copied().collect();
            let ids = (0..defs.len())
                .filter(|i| !ordered.contains(&ProgressionId(*i as u32)))
                .map(|i| defs[i].id.clone())
                .collect();
            return Err(ChainError::Cycle { ids });
        }

        for def in &defs {
            if let Some(scaling) = &def.scaling
                && (scaling.scale_with == def.id || !index.contains_key(&scaling.scale_with))
            {
                return Err(ChainError::InvalidScaling {
                    id: def.id.clone(),
                    scale_with: scaling.scale_with.clone(),
                });
            }
        }

        let mut children = vec![Vec::new(); defs.len()];
        for (i, p) in parent.iter().enumerate() {
            if let Some(p) = p {
                children[p.index()].push(ProgressionId(i as u32));
            }
        }

        let mut position = vec![0; defs.len()];
        for (pos, id) in order.iter().enumerate() {
            position[id.index()] = pos;
        }

        Ok(ChainGraph {
            types: defs,
            index,
            parent,
            children,
            order,
            position,
        })
    }

    /// Build a graph for a reload, rejecting only the offending types.
    ///
    /// Offending types are cycle members, types with dangling or invalid
    /// references, and transitively anything that follows a rejected type.
    /// When `prior` holds a definition for a rejected id, that definition is
    /// retried in its place. Returns the graph of every accepted type plus
    /// every error found along the way.
    pub fn rebuild(
        defs: Vec<ProgressionType>,
        prior: Option<&ChainGraph>,
    ) -> (ChainGraph, Vec<ChainError>) {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        let mut declared: HashSet<String> = HashSet::new();
        let mut candidates: Vec<ProgressionType> = Vec::with_capacity(defs.len());
        for def in defs {
            declared.insert(def.id.clone());
            if seen.insert(def.id.clone()) {
                candidates.push(def);
            } else {
                errors.push(ChainError::DuplicateId(def.id));
            }
        }

        let mut substituted: HashSet<String> = HashSet::new();
        let mut rejected: HashSet<String> = HashSet::new();

        // Each pass either substitutes a prior definition (once per id) or
        // drops at least one candidate, so this terminates within 2n passes.
        loop {
            let offending = find_offending(&candidates, &declared, &rejected);
            if offending.is_empty() {
                break;
            }
            for (id, error) in offending {
                if !substituted.contains(&id)
                    && let Some(prior_def) = prior.and_then(|g| g.get_by_name(&id))
                    && let Some(slot) = candidates.iter_mut().find(|d| d.id == id)
                    && *slot != *prior_def
                {
                    if !errors.contains(&error) {
                        errors.push(error);
                    }
                    *slot = prior_def.clone();
                    substituted.insert(id);
                    continue;
                }
                if !errors.contains(&error) {
                    errors.push(error);
                }
                candidates.retain(|d| d.id != id);
                rejected.insert(id);
            }
        }

        let graph = match ChainGraph::build(candidates) {
            Ok(graph) => graph,
            // Unreachable once find_offending reports nothing, but keep the
            // failure visible instead of activating a partial graph.
            Err(e) => {
                errors.push(e);
                ChainGraph::default()
            }
        };
        (graph, errors)
    }

    // -- Lookup --

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<ProgressionId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: ProgressionId) -> Option<&ProgressionType> {
        self.types.get(id.index())
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ProgressionType> {
        self.lookup(name).and_then(|id| self.get(id))
    }

    /// All definitions in declaration order.
    pub fn types(&self) -> &[ProgressionType] {
        &self.types
    }

    // -- Ordering --

    /// Topological order: every type appears after the type it follows.
    pub fn order(&self) -> &[ProgressionId] {
        &self.order
    }

    /// Definitions in topological order.
    pub fn ordered_types(&self) -> impl Iterator<Item = (ProgressionId, &ProgressionType)> {
        self.order.iter().map(|&id| (id, &self.types[id.index()]))
    }

    /// The type this one follows.
    pub fn previous(&self, id: ProgressionId) -> Option<ProgressionId> {
        self.parent.get(id.index()).copied().flatten()
    }

    /// The first type, in topological order, that follows this one.
    pub fn next(&self, id: ProgressionId) -> Option<ProgressionId> {
        self.children
            .get(id.index())?
            .iter()
            .copied()
            .min_by_key(|c| self.position[c.index()])
    }

    /// Every type that directly follows this one, in declaration order.
    pub fn following(&self, id: ProgressionId) -> &[ProgressionId] {
        self.children
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_root(&self, id: ProgressionId) -> bool {
        id.index() < self.types.len() && self.previous(id).is_none()
    }

    /// True when nothing follows this type.
    pub fn is_leaf(&self, id: ProgressionId) -> bool {
        id.index() < self.types.len() && self.following(id).is_empty()
    }

    /// Path from the root of this type's chain down to the type itself.
    pub fn chain_to(&self, id: ProgressionId) -> Vec<ProgressionId> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id).map(|_| id);
        // Bounded by the number of types: the graph is acyclic by construction.
        while let Some(current) = cursor {
            if chain.len() > self.types.len() {
                break;
            }
            chain.push(current);
            cursor = self.previous(current);
        }
        chain.reverse();
        chain
    }

    /// First type in topological order.
    pub fn base(&self) -> Option<ProgressionId> {
        self.order.first().copied()
    }

    /// Last type in topological order.
    pub fn highest(&self) -> Option<ProgressionId> {
        self.order.last().copied()
    }

    // -- Eligibility --

    /// The followed type and the level required in it, if any.
    pub fn requirement(&self, id: ProgressionId) -> Option<(ProgressionId, u64)> {
        let def = self.get(id)?;
        let prev = self.previous(id)?;
        let required = if def.requires_prior_max_level {
            self.types[prev.index()].level_limit
        } else {
            1
        };
        Some((prev, required))
    }

    /// Whether `state` may attempt the next level of `id`.
    ///
    /// True when the type is enabled and either is a root or the entity's
    /// level in the followed type meets the requirement. Unknown ids are
    /// never eligible.
    pub fn can_advance(&self, state: &EntityProgressionState, id: ProgressionId) -> bool {
        let Some(def) = self.get(id) else {
            return false;
        };
        if !def.enabled {
            return false;
        }
        match self.requirement(id) {
            None => true,
            Some((prev, required)) => state.level(&self.types[prev.index()].id) >= required,
        }
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            total: self.types.len(),
            enabled: self.types.iter().filter(|t| t.enabled).count(),
            order: self
                .order
                .iter()
                .map(|id| self.types[id.index()].id.clone())
                .collect(),
            base: self.base().map(|id| self.types[id.index()].id.clone()),
            highest: self.highest().map(|id| self.types[id.index()].id.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Kahn's algorithm over the `follows` forest. Ready nodes are taken by
/// smallest declaration index. Returns fewer ids than nodes on a cycle.
fn kahn_order(parent: &[Option<ProgressionId>]) -> Vec<ProgressionId> {
    let n = parent.len();
    let mut in_degree: Vec<usize> = parent.iter().map(|p| usize::from(p.is_some())).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, p) in parent.iter().enumerate() {
        if let Some(p) = p {
            children[p.index()].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(ProgressionId(node as u32));
        for &child in &children[node] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.push(Reverse(child));
            }
        }
    }
    order
}

/// Find every candidate that cannot be accepted as-is, with the reason.
fn find_offending(
    candidates: &[ProgressionType],
    declared: &HashSet<String>,
    rejected: &HashSet<String>,
) -> Vec<(String, ChainError)> {
    let index: HashMap<&str, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.as_str(), i))
        .collect();

    let mut offending = Vec::new();
    let mut parent = Vec::with_capacity(candidates.len());
    for def in candidates {
        match &def.follows {
            None => parent.push(None),
            Some(follows) => match index.get(follows.as_str()) {
                Some(&p) => parent.push(Some(ProgressionId(p as u32))),
                None => {
                    let error = if declared.contains(follows) || rejected.contains(follows) {
                        ChainError::FollowsRejected {
                            id: def.id.clone(),
                            follows: follows.clone(),
                        }
                    } else {
                        ChainError::DanglingFollows {
                            id: def.id.clone(),
                            follows: follows.clone(),
                        }
                    };
                    offending.push((def.id.clone(), error));
                    parent.push(None);
                }
            },
        }
    }
    if !offending.is_empty() {
        return offending;
    }

    let order = kahn_order(&parent);
    if order.len() != candidates.len() {
        let ordered: HashSet<usize> = order.iter().map(|id| id.index()).collect();
        let ids: Vec<String> = (0..candidates.len())
            .filter(|i| !ordered.contains(i))
            .map(|i| candidates[i].id.clone())
            .collect();
        let error = ChainError::Cycle { ids: ids.clone() };
        return ids.into_iter().map(|id| (id, error.clone())).collect();
    }

    for def in candidates {
        if let Some(scaling) = &def.scaling
            && (scaling.scale_with == def.id || !index.contains_key(scaling.scale_with.as_str()))
        {
            offending.push((
                def.id.clone(),
                ChainError::InvalidScaling {
                    id: def.id.clone(),
                    scale_with: scaling.scale_with.clone(),
                },
            ));
        }
    }
    offending
}

// ===========================================================================
// Tests
// ===========================================================================
