use chrono::{DateTime, Utc};
use rr_core::core::{AnnotatorId, UnitId, UnitKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An annotator's working copy of one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUnit {
    pub key: UnitKey,
    pub document: Value,
    /// Sequence number of the save that produced this copy.
    pub seq: u64,
    pub updated_at: DateTime<Utc>,
}

/// Timestamped snapshot kept for crash recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftRecord {
    pub id: Uuid,
    pub key: UnitKey,
    pub document: Value,
    pub saved_at: DateTime<Utc>,
}

/// Ordered queue of units assigned to one annotator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatorRecord {
    pub name: AnnotatorId,
    pub units: Vec<UnitId>,
    /// Position of the unit currently being worked on.
    #[serde(default)]
    pub unit_index: usize,
}

impl AnnotatorRecord {
    pub fn new(name: AnnotatorId, units: Vec<UnitId>) -> Self {
        Self {
            name,
            units,
            unit_index: 0,
        }
    }

    pub fn current_unit(&self) -> Option<&UnitId> {
        self.units.get(self.unit_index)
    }

    pub fn has_next(&self) -> bool {
        self.unit_index + 1 < self.units.len()
    }

    pub fn has_previous(&self) -> bool {
        self.unit_index > 0 && !self.units.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Snapshot into the draft collection; never touches the working copy.
    Draft,
    /// Upsert of the authoritative working copy.
    Final,
}

/// Result of an upsert, mirroring a document store's matched/upserted report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub matched: bool,
    pub upserted: bool,
    /// The write carried a sequence number not newer than the stored one and
    /// was discarded.
    pub stale: bool,
}

impl UpsertOutcome {
    pub fn inserted() -> Self {
        Self {
            matched: false,
            upserted: true,
            stale: false,
        }
    }

    pub fn updated() -> Self {
        Self {
            matched: true,
            upserted: false,
            stale: false,
        }
    }

    pub fn discarded() -> Self {
        Self {
            matched: true,
            upserted: false,
            stale: true,
        }
    }

    pub fn applied(&self) -> bool {
        !self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotator_record_queue_bounds() {
        let mut record = AnnotatorRecord::new(
            AnnotatorId::new("dana"),
            vec![UnitId::new("b1"), UnitId::new("b2")],
        );
        assert_eq!(record.current_unit(), Some(&UnitId::new("b1")));
        assert!(record.has_next());
        assert!(!record.has_previous());

        record.unit_index = 1;
        assert!(!record.has_next());
        assert!(record.has_previous());

        record.unit_index = 2;
        assert_eq!(record.current_unit(), None);
    }

    #[test]
    fn test_annotator_record_serde_defaults_index() {
        let record: AnnotatorRecord =
            serde_json::from_str(r#"{"name":"dana","units":["b1","b2"]}"#).unwrap();
        assert_eq!(record.unit_index, 0);
        assert_eq!(record.units[1], UnitId::new("b2"));
    }
}
