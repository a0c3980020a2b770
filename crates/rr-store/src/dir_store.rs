use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rr_core::core::{AnnotatorId, UnitId, UnitKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{AnnotatorRecord, DraftRecord, StoredUnit, UpsertOutcome};
use crate::store::{format_timestamp, DocumentStore, StoreError};

const TEMPLATES_DIR: &str = "unannotated";
const IN_PROGRESS_DIR: &str = "in_progress";
const DRAFTS_DIR: &str = "drafts";
const ANNOTATORS_DIR: &str = "annotators";

#[derive(Serialize, Deserialize)]
struct InProgressFile {
    seq: u64,
    updated_at: DateTime<Utc>,
    document: Value,
}

#[derive(Serialize, Deserialize)]
struct DraftFile {
    id: Uuid,
    saved_at: DateTime<Utc>,
    document: Value,
}

/// Offline store: one JSON file per document under a root directory.
///
/// ```text
/// <root>/unannotated/<unit>.json
/// <root>/in_progress/<annotator>/<unit>.json
/// <root>/drafts/<annotator>/<unit>/<timestamp>-<id>.json
/// <root>/annotators/<annotator>.json
/// ```
pub struct JsonDirStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn template_path(&self, unit: &UnitId) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join(TEMPLATES_DIR)
            .join(format!("{}.json", file_component(unit.as_str())?)))
    }

    fn in_progress_path(&self, key: &UnitKey) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join(IN_PROGRESS_DIR)
            .join(file_component(key.annotator.as_str())?)
            .join(format!("{}.json", file_component(key.unit.as_str())?)))
    }

    fn drafts_dir(&self, key: &UnitKey) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join(DRAFTS_DIR)
            .join(file_component(key.annotator.as_str())?)
            .join(file_component(key.unit.as_str())?))
    }

    fn annotator_path(&self, name: &AnnotatorId) -> Result<PathBuf, StoreError> {
        Ok(self
            .root
            .join(ANNOTATORS_DIR)
            .join(format!("{}.json", file_component(name.as_str())?)))
    }

    fn read_in_progress(&self, key: &UnitKey, path: &Path) -> Result<Option<StoredUnit>, StoreError> {
        let Some(file) = read_json::<InProgressFile>(path)? else {
            return Ok(None);
        };
        Ok(Some(StoredUnit {
            key: key.clone(),
            document: file.document,
            seq: file.seq,
            updated_at: file.updated_at,
        }))
    }
}

impl DocumentStore for JsonDirStore {
    fn init(&self) -> Result<(), StoreError> {
        for dir in [TEMPLATES_DIR, IN_PROGRESS_DIR, DRAFTS_DIR, ANNOTATORS_DIR] {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    fn find_template(&self, unit: &UnitId) -> Result<Option<Value>, StoreError> {
        read_json(&self.template_path(unit)?)
    }

    fn upsert_template(&self, unit: &UnitId, document: &Value) -> Result<UpsertOutcome, StoreError> {
        let path = self.template_path(unit)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let existed = path.exists();
        write_json(&path, document)?;
        Ok(if existed {
            UpsertOutcome::updated()
        } else {
            UpsertOutcome::inserted()
        })
    }

    fn list_templates(&self) -> Result<Vec<UnitId>, StoreError> {
        let mut units: Vec<UnitId> = json_stems(&self.root.join(TEMPLATES_DIR))?
            .into_iter()
            .map(UnitId::new)
            .collect();
        units.sort();
        Ok(units)
    }

    fn find_in_progress(&self, key: &UnitKey) -> Result<Option<StoredUnit>, StoreError> {
        let path = self.in_progress_path(key)?;
        self.read_in_progress(key, &path)
    }

    fn upsert_in_progress(&self, unit: &StoredUnit) -> Result<UpsertOutcome, StoreError> {
        let path = self.in_progress_path(&unit.key)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let outcome = match read_json::<InProgressFile>(&path)? {
            Some(stored) if stored.seq >= unit.seq => return Ok(UpsertOutcome::discarded()),
            Some(_) => UpsertOutcome::updated(),
            None => UpsertOutcome::inserted(),
        };
        write_json(
            &path,
            &InProgressFile {
                seq: unit.seq,
                updated_at: unit.updated_at,
                document: unit.document.clone(),
            },
        )?;
        Ok(outcome)
    }

    fn list_in_progress(&self) -> Result<Vec<StoredUnit>, StoreError> {
        let base = self.root.join(IN_PROGRESS_DIR);
        let mut annotators = subdirectories(&base)?;
        annotators.sort();

        let mut units = Vec::new();
        for annotator in annotators {
            let mut stems = json_stems(&base.join(&annotator))?;
            stems.sort();
            for stem in stems {
                let key = UnitKey::new(AnnotatorId::new(annotator.clone()), UnitId::new(stem));
                let path = self.in_progress_path(&key)?;
                if let Some(unit) = self.read_in_progress(&key, &path)? {
                    units.push(unit);
                }
            }
        }
        Ok(units)
    }

    fn insert_draft(&self, draft: &DraftRecord) -> Result<(), StoreError> {
        let dir = self.drafts_dir(&draft.key)?;
        let stamp = format_timestamp(&draft.saved_at).replace(':', "-");
        let path = dir.join(format!("{stamp}-{}.json", draft.id));
        write_json(
            &path,
            &DraftFile {
                id: draft.id,
                saved_at: draft.saved_at,
                document: draft.document.clone(),
            },
        )
    }

    fn latest_draft(&self, key: &UnitKey) -> Result<Option<DraftRecord>, StoreError> {
        let dir = self.drafts_dir(key)?;
        let mut latest: Option<DraftFile> = None;
        for stem in json_stems(&dir)? {
            let Some(file) = read_json::<DraftFile>(&dir.join(format!("{stem}.json")))? else {
                continue;
            };
            if latest.as_ref().map_or(true, |best| file.saved_at > best.saved_at) {
                latest = Some(file);
            }
        }
        Ok(latest.map(|file| DraftRecord {
            id: file.id,
            key: key.clone(),
            document: file.document,
            saved_at: file.saved_at,
        }))
    }

    fn find_annotator(&self, name: &AnnotatorId) -> Result<Option<AnnotatorRecord>, StoreError> {
        read_json(&self.annotator_path(name)?)
    }

    fn upsert_annotator(&self, record: &AnnotatorRecord) -> Result<(), StoreError> {
        let path = self.annotator_path(&record.name)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_json(&path, record)
    }

    fn list_annotators(&self) -> Result<Vec<AnnotatorRecord>, StoreError> {
        let dir = self.root.join(ANNOTATORS_DIR);
        let mut stems = json_stems(&dir)?;
        stems.sort();
        let mut records = Vec::new();
        for stem in stems {
            if let Some(record) = read_json(&dir.join(format!("{stem}.json")))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn set_unit_index(&self, name: &AnnotatorId, index: usize) -> Result<(), StoreError> {
        let path = self.annotator_path(name)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record: AnnotatorRecord =
            read_json(&path)?.ok_or_else(|| StoreError::NotFound(format!("annotator {name}")))?;
        record.unit_index = index;
        write_json(&path, &record)
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

fn file_component(value: &str) -> Result<&str, StoreError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains('\0');
    if invalid {
        return Err(StoreError::InvalidKey(value.to_owned()));
    }
    Ok(value)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Writes through a `.tmp` sibling and renames it into place.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn json_stems(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut stems = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            stems.push(stem.to_owned());
        }
    }
    Ok(stems)
}

fn subdirectories(dir: &Path) -> Result<Vec<String>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rr_core::core::{AnnotatorId, UnitId, UnitKey};
    use serde_json::json;
    use uuid::Uuid;

    use super::JsonDirStore;
    use crate::models::{AnnotatorRecord, DraftRecord, StoredUnit};
    use crate::store::{DocumentStore, StoreError};

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid RFC3339 timestamp")
            .with_timezone(&Utc)
    }

    fn key() -> UnitKey {
        UnitKey::new(AnnotatorId::new("dana"), UnitId::new("batch_1"))
    }

    #[test]
    fn test_in_progress_seq_guard_and_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(dir.path());
        store.init().expect("init");

        let write = |seq: u64, marker: i64| {
            store.upsert_in_progress(&StoredUnit {
                key: key(),
                document: json!({ "marker": marker }),
                seq,
                updated_at: ts("2026-03-01T10:00:00Z"),
            })
        };

        assert!(write(4, 4).expect("insert").upserted);
        assert!(write(3, 3).expect("stale").stale);
        assert!(write(5, 5).expect("update").matched);

        let stored = store.find_in_progress(&key()).expect("find").expect("present");
        assert_eq!(stored.seq, 5);
        assert_eq!(stored.document, json!({"marker": 5}));

        let listed = store.list_in_progress().expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, key());
    }

    #[test]
    fn test_templates_and_drafts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(dir.path());
        store.init().expect("init");

        store
            .upsert_template(&UnitId::new("batch_2"), &json!({"t": 2}))
            .expect("template");
        store
            .upsert_template(&UnitId::new("batch_1"), &json!({"t": 1}))
            .expect("template");
        assert_eq!(
            store.list_templates().expect("list"),
            vec![UnitId::new("batch_1"), UnitId::new("batch_2")]
        );

        for (stamp, marker) in [("2026-03-01T10:05:00Z", 2), ("2026-03-01T10:00:00Z", 1)] {
            store
                .insert_draft(&DraftRecord {
                    id: Uuid::new_v4(),
                    key: key(),
                    document: json!({ "marker": marker }),
                    saved_at: ts(stamp),
                })
                .expect("draft");
        }
        let latest = store.latest_draft(&key()).expect("latest").expect("present");
        assert_eq!(latest.document, json!({"marker": 2}));
    }

    #[test]
    fn test_annotator_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(dir.path());
        store.init().expect("init");

        let name = AnnotatorId::new("dana");
        store
            .upsert_annotator(&AnnotatorRecord::new(name.clone(), vec![UnitId::new("b1")]))
            .expect("upsert");
        store.set_unit_index(&name, 1).expect("index");

        let record = store.find_annotator(&name).expect("find").expect("present");
        assert_eq!(record.unit_index, 1);
        assert!(store.find_annotator(&AnnotatorId::new("lee")).expect("find").is_none());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::new(dir.path());

        let err = store
            .find_template(&UnitId::new("../escape"))
            .expect_err("path separator rejected");
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}
