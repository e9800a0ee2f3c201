use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::extraction::change_detector::{ChangeDetector, ChangeKind, Record};
use crate::extraction::graph::{GraphError, JsonGraph, NodeId, StateGraph};
use crate::extraction::path_cache::PathCache;
use crate::extraction::search::{ArraySignature, SearchLimits, SearchOutcome, SearchStats, TreeSearch};

#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub tick_interval: Duration,
    pub node_budget_per_slice: usize,
    /// Slices one pass may spend before the search is abandoned for the tick
    pub max_slices_per_pass: usize,
    pub limits: SearchLimits,
    pub signature: ArraySignature,
    pub id_field: String,
    pub watched_fields: Vec<String>,
}

/// One emitted extraction result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Record>>,
    pub path: String,
    pub total_count: usize,
    pub changed_count: usize,
    pub cache_hit: bool,
    pub nodes_visited: usize,
    pub elapsed_us: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub passes: u64,
    pub cache_hits: u64,
    pub searches: u64,
    pub not_found: u64,
    pub abandoned: u64,
    pub events: u64,
}

/// Where each tick gets its view of the host state from.
#[async_trait]
pub trait HostStateSource: Send {
    type Graph: StateGraph + Send + Sync;

    /// Current graph and root handle; `None` when the host has nothing to offer yet.
    async fn capture(&mut self) -> Result<Option<(Self::Graph, NodeId)>, GraphError>;
}

/// Polls a JSON document from disk and roots the graph at a JSON pointer.
pub struct JsonFileSource {
    path: PathBuf,
    root_pointer: String,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>, root_pointer: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            root_pointer: root_pointer.into(),
        }
    }
}

#[async_trait]
impl HostStateSource for JsonFileSource {
    type Graph = JsonGraph;

    async fn capture(&mut self) -> Result<Option<(JsonGraph, NodeId)>, GraphError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GraphError::InvalidDocument(format!("{}: {}", self.path.display(), e)));
            }
        };

        let graph = JsonGraph::from_json_str(&text)?;
        match graph.pointer(&self.root_pointer) {
            Some(root) => Ok(Some((graph, root))),
            None => {
                debug!("Root pointer {} not present in {}", self.root_pointer, self.path.display());
                Ok(None)
            }
        }
    }
}

/// Cooperative extraction loop. Owns the path cache and the snapshot, so no
/// two passes ever touch them at once.
pub struct ExtractionScheduler {
    settings: ExtractionSettings,
    path_cache: PathCache,
    detector: ChangeDetector,
    stats: SchedulerStats,
}

impl ExtractionScheduler {
    pub fn new(settings: ExtractionSettings) -> Self {
        let detector = ChangeDetector::new(settings.id_field.clone(), settings.watched_fields.clone());
        Self {
            settings,
            path_cache: PathCache::new(),
            detector,
            stats: SchedulerStats::default(),
        }
    }

    pub fn with_path_cache(mut self, path_cache: PathCache) -> Self {
        self.path_cache = path_cache;
        self
    }

    pub fn path_cache(&self) -> &PathCache {
        &self.path_cache
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// One extraction pass: cached path, else a sliced search, then diff.
    /// `None` means nothing was found this tick.
    pub async fn run_pass<G>(&mut self, graph: &G, root: NodeId) -> Option<ExtractionEvent>
    where
        G: StateGraph + Sync + ?Sized,
    {
        let started = Instant::now();
        self.stats.passes += 1;

        let cached = self.path_cache.lookup(graph, root, &self.settings.signature);
        let (node, path, cache_hit, search_stats) = match cached {
            Some((node, path)) => {
                self.stats.cache_hits += 1;
                (node, path, true, SearchStats::default())
            }
            None => {
                self.stats.searches += 1;
                let mut search = TreeSearch::new(
                    graph,
                    root,
                    self.settings.signature.clone(),
                    self.settings.limits.clone(),
                );

                let mut outcome = SearchOutcome::Suspended;
                for _ in 0..self.settings.max_slices_per_pass.max(1) {
                    outcome = search.step(graph, self.settings.node_budget_per_slice);
                    if outcome != SearchOutcome::Suspended {
                        break;
                    }
                    tokio::task::yield_now().await;
                }

                match outcome {
                    SearchOutcome::Found(hit) => {
                        self.path_cache.store(hit.path.clone());
                        (hit.node, hit.path, false, search.stats())
                    }
                    SearchOutcome::Exhausted => {
                        self.stats.not_found += 1;
                        debug!("🔍 No record array found ({} nodes visited)", search.stats().nodes_visited);
                        return None;
                    }
                    SearchOutcome::Suspended => {
                        self.stats.abandoned += 1;
                        debug!("⏸️ Search abandoned after {} nodes", search.stats().nodes_visited);
                        return None;
                    }
                }
            }
        };

        let records = match graph.materialize(node) {
            Ok(Value::Array(records)) => records,
            Ok(_) => {
                self.path_cache.clear();
                return None;
            }
            Err(e) => {
                warn!("⚠️ Record array at {} could not be read: {}", path, e);
                self.path_cache.clear();
                return None;
            }
        };

        let change = self.detector.detect(&records);
        let changed_count = change.changed.len();
        let data = (change.kind != ChangeKind::NoChange).then_some(change.changed);
        self.stats.events += 1;

        Some(ExtractionEvent {
            kind: change.kind,
            data,
            path: path.to_string(),
            total_count: change.total_count,
            changed_count,
            cache_hit,
            nodes_visited: search_stats.nodes_visited,
            elapsed_us: started.elapsed().as_micros() as u64,
        })
    }

    /// Tick forever. Ticks that fire while a pass is still running are skipped.
    /// Stops once the event receiver is dropped.
    pub async fn run<S: HostStateSource>(mut self, mut source: S, events: mpsc::UnboundedSender<ExtractionEvent>) {
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "🔍 Extraction loop started: tick {:?}, {} nodes per slice",
            self.settings.tick_interval, self.settings.node_budget_per_slice
        );

        loop {
            ticker.tick().await;
            if events.is_closed() {
                break;
            }

            let (graph, root) = match source.capture().await {
                Ok(Some(captured)) => captured,
                Ok(None) => continue,
                Err(e) => {
                    warn!("⚠️ Host state unavailable: {}", e);
                    continue;
                }
            };

            if let Some(event) = self.run_pass(&graph, root).await {
                if events.send(event).is_err() {
                    break;
                }
            }
        }

        info!(
            "🛑 Extraction loop stopped after {} passes ({} cache hits, {} searches)",
            self.stats.passes, self.stats.cache_hits, self.stats.searches
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> ExtractionSettings {
        ExtractionSettings {
            tick_interval: Duration::from_millis(10),
            node_budget_per_slice: 4,
            max_slices_per_pass: 64,
            limits: SearchLimits {
                max_depth: 8,
                max_ancestors: 4,
                slots: vec!["props".to_string(), "state".to_string()],
            },
            signature: ArraySignature::new(1, vec!["id".to_string(), "price".to_string()]),
            id_field: "id".to_string(),
            watched_fields: vec!["price".to_string()],
        }
    }

    fn host(price: i64) -> JsonGraph {
        JsonGraph::from_value(&json!({
            "state": {"store": {"rows": [{"id": "A", "price": price}]}},
            "view": {}
        }))
    }

    #[tokio::test]
    async fn test_first_pass_searches_then_cache_short_circuits() {
        let mut scheduler = ExtractionScheduler::new(settings());
        let graph = host(1);
        let root = graph.pointer("/view").unwrap();

        let first = scheduler.run_pass(&graph, root).await.unwrap();
        assert_eq!(first.kind, ChangeKind::Snapshot);
        assert!(!first.cache_hit);
        assert!(first.nodes_visited > 0);
        assert_eq!(first.path, "^1.state.store.rows");

        let second = scheduler.run_pass(&graph, root).await.unwrap();
        assert_eq!(second.kind, ChangeKind::NoChange);
        assert!(second.cache_hit);
        assert_eq!(second.nodes_visited, 0);
        assert!(second.data.is_none());
        assert_eq!(scheduler.stats().searches, 1);
    }

    #[tokio::test]
    async fn test_invalid_cache_falls_back_to_one_search() {
        let mut stale = PathCache::new();
        stale.store(crate::extraction::search::NavigationPath {
            ancestor_depth: 0,
            slot: "props".to_string(),
            keys: vec!["gone".to_string()],
        });
        let mut scheduler = ExtractionScheduler::new(settings()).with_path_cache(stale);

        let graph = host(3);
        let event = scheduler.run_pass(&graph, JsonGraph::ROOT).await.unwrap();

        assert!(!event.cache_hit);
        assert_eq!(scheduler.stats().searches, 1);
        assert_eq!(scheduler.path_cache().entry().map(|p| p.to_string()), Some("^0.state.store.rows".to_string()));
    }

    #[tokio::test]
    async fn test_not_found_skips_tick_and_keeps_snapshot() {
        let mut scheduler = ExtractionScheduler::new(settings());
        let graph = host(1);
        scheduler.run_pass(&graph, JsonGraph::ROOT).await.unwrap();

        let empty = JsonGraph::from_value(&json!({"state": {}}));
        assert!(scheduler.run_pass(&empty, JsonGraph::ROOT).await.is_none());
        assert!(scheduler.path_cache().entry().is_none());
        assert_eq!(scheduler.detector().snapshot().len(), 1);

        let changed = scheduler.run_pass(&host(2), JsonGraph::ROOT).await.unwrap();
        assert_eq!(changed.kind, ChangeKind::Update);
        assert_eq!(changed.changed_count, 1);
    }

    #[tokio::test]
    async fn test_search_over_slice_allowance_is_abandoned() {
        let mut tight = settings();
        tight.node_budget_per_slice = 1;
        tight.max_slices_per_pass = 2;
        let mut scheduler = ExtractionScheduler::new(tight);

        assert!(scheduler.run_pass(&host(1), JsonGraph::ROOT).await.is_none());
        assert_eq!(scheduler.stats().abandoned, 1);
        assert!(scheduler.path_cache().entry().is_none());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = ExtractionEvent {
            kind: ChangeKind::NoChange,
            data: None,
            path: "^0.state.rows".to_string(),
            total_count: 3,
            changed_count: 0,
            cache_hit: true,
            nodes_visited: 0,
            elapsed_us: 12,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "no-change");
        assert_eq!(value["totalCount"], 3);
        assert_eq!(value["changedCount"], 0);
        assert_eq!(value["cacheHit"], true);
        assert!(value.get("data").is_none());
    }
}
