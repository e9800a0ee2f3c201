use serde_json::Value;
use thiserror::Error;

/// Identity of a node inside one captured state graph.
pub type NodeId = usize;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {node} is unreadable: {reason}")]
    Unreadable { node: NodeId, reason: String },

    #[error("Cycle detected while reading node {0}")]
    CycleDetected(NodeId),

    #[error("Invalid state document: {0}")]
    InvalidDocument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Object,
    Array { len: usize },
    Scalar,
}

/// A graph with parent back-references and string-keyed child slots.
///
/// Every accessor may fail: host state is read through accessors the host can
/// change or break at any time, so callers treat errors as per-node damage.
pub trait StateGraph {
    fn parent(&self, node: NodeId) -> Result<Option<NodeId>, GraphError>;

    fn kind(&self, node: NodeId) -> Result<NodeKind, GraphError>;

    /// Child slots in a stable order. Array elements are keyed by their index.
    fn child_slots(&self, node: NodeId) -> Result<Vec<(String, NodeId)>, GraphError>;

    fn child(&self, node: NodeId, key: &str) -> Result<Option<NodeId>, GraphError> {
        Ok(self
            .child_slots(node)?
            .into_iter()
            .find_map(|(slot, child)| (slot == key).then_some(child)))
    }

    /// Copy the subtree rooted at `node` out of the graph.
    fn materialize(&self, node: NodeId) -> Result<Value, GraphError>;
}

#[derive(Debug, Clone)]
enum NodeData {
    Object(Vec<(String, NodeId)>),
    Array(Vec<NodeId>),
    Scalar(Value),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    data: NodeData,
}

/// Arena-backed state graph built from a JSON document.
///
/// Containment gives the parent links. Extra alias edges added with [`JsonGraph::link`]
/// model the shared references and cycles real host state carries.
#[derive(Debug, Clone)]
pub struct JsonGraph {
    nodes: Vec<Node>,
}

impl JsonGraph {
    pub const ROOT: NodeId = 0;

    pub fn from_value(value: &Value) -> Self {
        let mut graph = Self { nodes: Vec::new() };
        graph.insert(value, None);
        graph
    }

    pub fn from_json_str(text: &str) -> Result<Self, GraphError> {
        let value: Value = serde_json::from_str(text).map_err(|e| GraphError::InvalidDocument(e.to_string()))?;
        Ok(Self::from_value(&value))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, value: &Value, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            parent,
            data: NodeData::Scalar(Value::Null),
        });

        let data = match value {
            Value::Object(map) => {
                NodeData::Object(map.iter().map(|(k, v)| (k.clone(), self.insert(v, Some(id)))).collect())
            }
            Value::Array(items) => NodeData::Array(items.iter().map(|v| self.insert(v, Some(id))).collect()),
            scalar => NodeData::Scalar(scalar.clone()),
        };
        self.nodes[id].data = data;
        id
    }

    fn node(&self, node: NodeId) -> Result<&Node, GraphError> {
        self.nodes.get(node).ok_or(GraphError::UnknownNode(node))
    }

    /// Resolve an RFC 6901 JSON pointer along containment edges.
    pub fn pointer(&self, pointer: &str) -> Option<NodeId> {
        if pointer.is_empty() {
            return Some(Self::ROOT);
        }
        let rest = pointer.strip_prefix('/')?;

        let mut current = Self::ROOT;
        for token in rest.split('/') {
            let token = token.replace("~1", "/").replace("~0", "~");
            current = match &self.nodes.get(current)?.data {
                NodeData::Object(entries) => entries.iter().find(|(k, _)| *k == token).map(|(_, id)| *id)?,
                NodeData::Array(items) => *items.get(token.parse::<usize>().ok()?)?,
                NodeData::Scalar(_) => return None,
            };
        }
        Some(current)
    }

    /// Add or replace an object slot pointing at an existing node without
    /// re-parenting it.
    pub fn link(&mut self, from: NodeId, key: &str, to: NodeId) -> Result<(), GraphError> {
        self.node(to)?;
        let node = self.nodes.get_mut(from).ok_or(GraphError::UnknownNode(from))?;
        match &mut node.data {
            NodeData::Object(entries) => {
                match entries.iter_mut().find(|(k, _)| k == key) {
                    Some(entry) => entry.1 = to,
                    None => entries.push((key.to_string(), to)),
                }
                Ok(())
            }
            _ => Err(GraphError::Unreadable {
                node: from,
                reason: "only objects carry keyed slots".to_string(),
            }),
        }
    }

    fn materialize_guarded(&self, node: NodeId, on_path: &mut Vec<NodeId>) -> Result<Value, GraphError> {
        if on_path.contains(&node) {
            return Err(GraphError::CycleDetected(node));
        }
        on_path.push(node);

        let value = match &self.node(node)?.data {
            NodeData::Object(entries) => {
                let mut map = serde_json::Map::with_capacity(entries.len());
                for (key, child) in entries {
                    map.insert(key.clone(), self.materialize_guarded(*child, on_path)?);
                }
                Value::Object(map)
            }
            NodeData::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|child| self.materialize_guarded(*child, on_path))
                    .collect::<Result<_, _>>()?,
            ),
            NodeData::Scalar(value) => value.clone(),
        };

        on_path.pop();
        Ok(value)
    }
}

impl StateGraph for JsonGraph {
    fn parent(&self, node: NodeId) -> Result<Option<NodeId>, GraphError> {
        Ok(self.node(node)?.parent)
    }

    fn kind(&self, node: NodeId) -> Result<NodeKind, GraphError> {
        Ok(match &self.node(node)?.data {
            NodeData::Object(_) => NodeKind::Object,
            NodeData::Array(items) => NodeKind::Array { len: items.len() },
            NodeData::Scalar(_) => NodeKind::Scalar,
        })
    }

    fn child_slots(&self, node: NodeId) -> Result<Vec<(String, NodeId)>, GraphError> {
        Ok(match &self.node(node)?.data {
            NodeData::Object(entries) => entries.clone(),
            NodeData::Array(items) => items.iter().enumerate().map(|(i, id)| (i.to_string(), *id)).collect(),
            NodeData::Scalar(_) => Vec::new(),
        })
    }

    fn child(&self, node: NodeId, key: &str) -> Result<Option<NodeId>, GraphError> {
        Ok(match &self.node(node)?.data {
            NodeData::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, id)| *id),
            NodeData::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).copied()),
            NodeData::Scalar(_) => None,
        })
    }

    fn materialize(&self, node: NodeId) -> Result<Value, GraphError> {
        self.materialize_guarded(node, &mut Vec::new())
    }
}
