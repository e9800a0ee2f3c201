//! Incremental extraction of the market list from an opaque host state graph.

pub mod change_detector;
pub mod graph;
pub mod path_cache;
pub mod scheduler;
pub mod search;

pub use change_detector::{ChangeDetector, ChangeKind, ChangeSet, Record};
pub use graph::{GraphError, JsonGraph, NodeId, NodeKind, StateGraph};
pub use path_cache::PathCache;
pub use scheduler::{ExtractionEvent, ExtractionScheduler, ExtractionSettings, HostStateSource, JsonFileSource};
pub use search::{ArraySignature, NavigationPath, SearchLimits, SearchOutcome, TreeSearch};
