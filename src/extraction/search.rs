use std::fmt;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extraction::graph::{GraphError, NodeId, NodeKind, StateGraph};

/// Structural test for the record array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArraySignature {
    pub min_len: usize,
    pub required_keys: Vec<String>,
}

impl ArraySignature {
    pub fn new(min_len: usize, required_keys: Vec<String>) -> Self {
        Self { min_len, required_keys }
    }

    /// Array of at least `min_len` elements whose first element is an object
    /// carrying every required key.
    pub fn matches<G: StateGraph + ?Sized>(&self, graph: &G, node: NodeId) -> Result<bool, GraphError> {
        let len = match graph.kind(node)? {
            NodeKind::Array { len } => len,
            _ => return Ok(false),
        };
        if len < self.min_len.max(1) {
            return Ok(false);
        }

        let Some(first) = graph.child(node, "0")? else {
            return Ok(false);
        };
        if graph.kind(first)? != NodeKind::Object {
            return Ok(false);
        }

        let keys: FxHashSet<String> = graph.child_slots(first)?.into_iter().map(|(k, _)| k).collect();
        Ok(self.required_keys.iter().all(|k| keys.contains(k)))
    }
}

/// Navigation descriptor: climb `ancestor_depth` parents from the root, enter
/// `slot`, then follow `keys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationPath {
    pub ancestor_depth: usize,
    pub slot: String,
    pub keys: Vec<String>,
}

impl NavigationPath {
    pub fn resolve<G: StateGraph + ?Sized>(&self, graph: &G, root: NodeId) -> Result<Option<NodeId>, GraphError> {
        let mut current = root;
        for _ in 0..self.ancestor_depth {
            match graph.parent(current)? {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }

        let Some(mut current) = graph.child(current, &self.slot)? else {
            return Ok(None);
        };
        for key in &self.keys {
            match graph.child(current, key)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl fmt::Display for NavigationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "^{}.{}", self.ancestor_depth, self.slot)?;
        for key in &self.keys {
            write!(f, ".{}", key)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SearchLimits {
    pub max_depth: usize,
    pub max_ancestors: usize,
    /// The designated state slots inspected on every ancestor, in order
    pub slots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub node: NodeId,
    pub path: NavigationPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(SearchHit),
    /// Bounds exhausted without a match
    Exhausted,
    /// Slice budget spent; call `step` again to continue
    Suspended,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    pub nodes_visited: usize,
    pub ancestors_walked: usize,
    pub slices: usize,
    pub node_errors: usize,
}

struct Frame {
    node: NodeId,
    slot: usize,
    keys: Vec<String>,
}

/// Resumable depth-first search for the record array.
///
/// One instance is one search call: the visited set lives and dies with it.
/// Work is handed out in slices through [`TreeSearch::step`].
pub struct TreeSearch {
    signature: ArraySignature,
    limits: SearchLimits,
    ancestor: NodeId,
    ancestor_depth: usize,
    stack: Vec<Frame>,
    visited: FxHashSet<NodeId>,
    stats: SearchStats,
    done: bool,
}

impl TreeSearch {
    pub fn new<G: StateGraph + ?Sized>(graph: &G, root: NodeId, signature: ArraySignature, limits: SearchLimits) -> Self {
        let mut search = Self {
            signature,
            limits,
            ancestor: root,
            ancestor_depth: 0,
            stack: Vec::new(),
            visited: FxHashSet::default(),
            stats: SearchStats::default(),
            done: false,
        };
        search.seed_slots(graph);
        search
    }

    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    fn seed_slots<G: StateGraph + ?Sized>(&mut self, graph: &G) {
        // Reverse so the first designated slot is explored first
        for slot in (0..self.limits.slots.len()).rev() {
            match graph.child(self.ancestor, &self.limits.slots[slot]) {
                Ok(Some(node)) => self.stack.push(Frame { node, slot, keys: Vec::new() }),
                Ok(None) => {}
                Err(e) => self.record_error(self.ancestor, &e),
            }
        }
    }

    fn record_error(&mut self, node: NodeId, error: &GraphError) {
        self.stats.node_errors += 1;
        debug!("Skipping unreadable node {} during search: {}", node, error);
    }

    /// Climb to the next ancestor. Returns false when the walk is over.
    fn climb<G: StateGraph + ?Sized>(&mut self, graph: &G) -> bool {
        if self.ancestor_depth >= self.limits.max_ancestors {
            return false;
        }
        match graph.parent(self.ancestor) {
            Ok(Some(parent)) => {
                self.ancestor = parent;
                self.ancestor_depth += 1;
                self.stats.ancestors_walked += 1;
                self.seed_slots(graph);
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.record_error(self.ancestor, &e);
                false
            }
        }
    }

    /// Visit up to `budget` nodes.
    pub fn step<G: StateGraph + ?Sized>(&mut self, graph: &G, budget: usize) -> SearchOutcome {
        if self.done {
            return SearchOutcome::Exhausted;
        }
        self.stats.slices += 1;
        let mut visited_this_slice = 0;

        loop {
            let Some(frame) = self.stack.pop() else {
                if self.climb(graph) {
                    continue;
                }
                self.done = true;
                return SearchOutcome::Exhausted;
            };

            if !self.visited.insert(frame.node) {
                continue;
            }
            if visited_this_slice >= budget {
                // Put it back for the next slice
                self.visited.remove(&frame.node);
                self.stack.push(frame);
                return SearchOutcome::Suspended;
            }
            visited_this_slice += 1;
            self.stats.nodes_visited += 1;

            match self.signature.matches(graph, frame.node) {
                Ok(true) => {
                    self.done = true;
                    return SearchOutcome::Found(SearchHit {
                        node: frame.node,
                        path: NavigationPath {
                            ancestor_depth: self.ancestor_depth,
                            slot: self.limits.slots[frame.slot].clone(),
                            keys: frame.keys,
                        },
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    self.record_error(frame.node, &e);
                    continue;
                }
            }

            if frame.keys.len() >= self.limits.max_depth {
                continue;
            }

            match graph.child_slots(frame.node) {
                Ok(children) => {
                    for (key, child) in children.into_iter().rev() {
                        if self.visited.contains(&child) {
                            continue;
                        }
                        let mut keys = frame.keys.clone();
                        keys.push(key);
                        self.stack.push(Frame {
                            node: child,
                            slot: frame.slot,
                            keys,
                        });
                    }
                }
                Err(e) => self.record_error(frame.node, &e),
            }
        }
    }

    /// Drive the search to completion without yielding.
    pub fn run_to_end<G: StateGraph + ?Sized>(&mut self, graph: &G) -> SearchOutcome {
        loop {
            match self.step(graph, usize::MAX) {
                SearchOutcome::Suspended => continue,
                outcome => return outcome,
            }
        }
    }
}
