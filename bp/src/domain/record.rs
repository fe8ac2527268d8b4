//! Records submitted for ingestion

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Whether a record creates an entity or patches one created earlier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Create,
    Update,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// A single unit of telemetry destined for the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,

    /// Entity id; a create and its updates share it
    #[serde(default = "new_id")]
    pub id: String,

    /// Field values; on the wire the id is added alongside them
    #[serde(default)]
    pub payload: Map<String, Value>,

    #[serde(skip, default = "Instant::now")]
    pub enqueued_at: Instant,
}

fn new_id() -> String {
    Uuid::now_v7().to_string()
}

fn into_map(payload: Value) -> Map<String, Value> {
    match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

impl Record {
    /// New create record; non-object payloads are stored under `value`
    pub fn create(id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: RecordKind::Create,
            id: id.into(),
            payload: into_map(payload),
            enqueued_at: Instant::now(),
        }
    }

    /// New update record for an existing entity
    pub fn update(id: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: RecordKind::Update,
            id: id.into(),
            payload: into_map(payload),
            enqueued_at: Instant::now(),
        }
    }

    /// New create record with a generated id
    pub fn create_with_new_id(payload: Value) -> Self {
        Self::create(new_id(), payload)
    }

    pub fn is_create(&self) -> bool {
        self.kind == RecordKind::Create
    }

    /// Fold an update into this record; the update's fields win
    pub fn absorb(&mut self, update: Record) {
        for (key, value) in update.payload {
            self.payload.insert(key, value);
        }
    }

    /// JSON body sent to the endpoint: the payload plus the id
    pub fn to_wire(&self) -> Value {
        let mut body = self.payload.clone();
        body.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(body)
    }
}
