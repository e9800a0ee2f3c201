use tracing::debug;

use crate::extraction::graph::{NodeId, StateGraph};
use crate::extraction::search::{ArraySignature, NavigationPath};

/// Single-slot memory of the last navigation path that led to the record array.
///
/// Purely advisory: a miss only costs a full search.
#[derive(Debug, Default)]
pub struct PathCache {
    entry: Option<NavigationPath>,
    hits: u64,
    misses: u64,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self) -> Option<&NavigationPath> {
        self.entry.as_ref()
    }

    pub fn store(&mut self, path: NavigationPath) {
        debug!("🧭 Caching navigation path {}", path);
        self.entry = Some(path);
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }

    /// Resolve the cached path and re-validate the array it lands on.
    /// Any failure clears the slot.
    pub fn lookup<G: StateGraph + ?Sized>(
        &mut self,
        graph: &G,
        root: NodeId,
        signature: &ArraySignature,
    ) -> Option<(NodeId, NavigationPath)> {
        let path = self.entry.as_ref()?;

        let resolved = match path.resolve(graph, root) {
            Ok(Some(node)) => match signature.matches(graph, node) {
                Ok(true) => Some(node),
                Ok(false) => None,
                Err(e) => {
                    debug!("Cached path {} hit an unreadable node: {}", path, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                debug!("Cached path {} failed to resolve: {}", path, e);
                None
            }
        };

        match resolved {
            Some(node) => {
                self.hits += 1;
                Some((node, path.clone()))
            }
            None => {
                self.misses += 1;
                debug!("Cached path {} is no longer valid", path);
                self.entry = None;
                None
            }
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}
