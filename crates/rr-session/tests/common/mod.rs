#![allow(dead_code)]

use std::sync::Arc;

use rr_core::core::{AnnotatorId, UnitId};
use rr_session::coordinator::{SessionCoordinator, SessionOptions};
use rr_store::{AnnotatorRecord, DocumentStore, PersistenceGateway, SqliteDocumentStore};
use serde_json::{json, Value};

pub const ANNOTATOR: &str = "dana";

// ---------------------------------------------------------------------------
// Corpus fixtures
// ---------------------------------------------------------------------------

fn turns(count: u32) -> Value {
    (0..count)
        .map(|n| {
            json!({
                "turn_num": n,
                "original_question": format!("question {n}"),
                "answer": format!("answer {n}"),
            })
        })
        .collect()
}

/// Flat-layout corpus without context tracking. Each entry is the number of
/// annotation slots of one dialog.
pub fn flat_corpus(slots: &[u32]) -> Value {
    let mut dialogs = serde_json::Map::new();
    for (i, count) in slots.iter().enumerate() {
        let annotations: Value = (0..*count)
            .map(|_| json!({"requires_rewrite": null}))
            .collect();
        dialogs.insert(
            format!("dlg-{i}"),
            json!({
                "dialog": turns(count + 1),
                "annotations": annotations,
                "annotator_id": null,
            }),
        );
    }
    Value::Object(dialogs)
}

/// Turn-keyed corpus that tracks `enough_context`.
pub fn context_corpus(slots: &[u32]) -> Value {
    let mut dialogs = serde_json::Map::new();
    for (i, count) in slots.iter().enumerate() {
        let mut dialog = serde_json::Map::new();
        dialog.insert("dialog".to_owned(), turns(count + 1));
        for n in 1..=*count {
            dialog.insert(
                n.to_string(),
                json!({
                    "requires_rewrite": null,
                    "enough_context": null,
                    "rewrite_a": {"text": format!("rewrite {n}"), "score": 0.5, "optimal": false},
                }),
            );
        }
        dialog.insert("annotator_id".to_owned(), Value::Null);
        dialogs.insert(format!("dlg-{i}"), Value::Object(dialog));
    }
    Value::Object(dialogs)
}

// ---------------------------------------------------------------------------
// TestStore: in-memory store with seeded templates
// ---------------------------------------------------------------------------

pub struct TestStore {
    pub store: Arc<SqliteDocumentStore>,
}

impl TestStore {
    pub fn new() -> Self {
        let store = SqliteDocumentStore::new_in_memory().expect("in-memory store");
        store.init().expect("init store");
        Self {
            store: Arc::new(store),
        }
    }

    pub fn seed(&self, unit: &str, document: &Value) -> &Self {
        self.store
            .upsert_template(&UnitId::new(unit), document)
            .expect("seed template");
        self
    }

    pub fn assign(&self, units: &[&str]) -> &Self {
        let record = AnnotatorRecord::new(
            AnnotatorId::new(ANNOTATOR),
            units.iter().map(|unit| UnitId::new(*unit)).collect(),
        );
        self.store.upsert_annotator(&record).expect("assign units");
        self
    }

    pub fn gateway(&self) -> PersistenceGateway {
        let store: Arc<dyn DocumentStore> = self.store.clone();
        PersistenceGateway::new(store)
    }

    pub async fn start(&self, unit: Option<&str>) -> SessionCoordinator {
        SessionCoordinator::start(
            self.gateway(),
            AnnotatorId::new(ANNOTATOR),
            unit.map(UnitId::new),
            SessionOptions::default(),
        )
        .await
        .expect("session should start")
    }
}
