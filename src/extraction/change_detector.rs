use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Watched-field projection of one instrument.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "snapshot")]
    Snapshot,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "no-change")]
    NoChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    pub kind: ChangeKind,
    pub changed: Vec<Record>,
    pub total_count: usize,
    /// Records dropped for lacking an id
    pub untracked: usize,
}

/// Per-id diff of successive record arrays against the last emitted state.
///
/// Field comparison is strict `Value` equality: `1.0` and `1.00000001` differ,
/// as do `1` and `"1"`.
#[derive(Debug)]
pub struct ChangeDetector {
    id_field: String,
    watched_fields: Vec<String>,
    snapshot: FxHashMap<String, Record>,
}

impl ChangeDetector {
    pub fn new(id_field: impl Into<String>, watched_fields: Vec<String>) -> Self {
        Self {
            id_field: id_field.into(),
            watched_fields,
            snapshot: FxHashMap::default(),
        }
    }

    pub fn snapshot(&self) -> &FxHashMap<String, Record> {
        &self.snapshot
    }

    pub fn reset(&mut self) {
        self.snapshot.clear();
    }

    fn record_id(&self, record: &Map<String, Value>) -> Option<String> {
        match record.get(&self.id_field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The id field plus every watched field the record carries.
    fn project(&self, record: &Map<String, Value>) -> Record {
        let mut projection = Record::new();
        if let Some(id) = record.get(&self.id_field) {
            projection.insert(self.id_field.clone(), id.clone());
        }
        for field in &self.watched_fields {
            if let Some(value) = record.get(field) {
                projection.insert(field.clone(), value.clone());
            }
        }
        projection
    }

    pub fn detect(&mut self, records: &[Value]) -> ChangeSet {
        let was_empty = self.snapshot.is_empty();
        let mut changed = Vec::new();
        let mut untracked = 0;

        for record in records {
            let Some(fields) = record.as_object() else {
                untracked += 1;
                continue;
            };
            let Some(id) = self.record_id(fields) else {
                untracked += 1;
                continue;
            };

            let projection = self.project(fields);
            let differs = match self.snapshot.get(&id) {
                None => true,
                Some(previous) => self
                    .watched_fields
                    .iter()
                    .any(|field| previous.get(field) != projection.get(field)),
            };

            if differs {
                changed.push(projection.clone());
                self.snapshot.insert(id, projection);
            }
        }

        let kind = if was_empty {
            ChangeKind::Snapshot
        } else if changed.is_empty() {
            ChangeKind::NoChange
        } else {
            ChangeKind::Update
        };

        ChangeSet {
            kind,
            changed,
            total_count: records.len(),
            untracked,
        }
    }
}
