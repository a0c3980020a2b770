use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rr_core::core::{
    AnnotatorId, Corpus, Cursor, IntegrityIssue, IntegrityWarning, JudgmentField, UnitKey,
};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::{AnnotatorRecord, DraftRecord, SaveMode, StoredUnit, UpsertOutcome};
use crate::store::{DocumentStore, StoreError};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Where a loaded corpus came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOrigin {
    InProgress,
    Template,
    Draft,
}

#[derive(Debug, Clone)]
pub struct LoadedUnit {
    pub corpus: Corpus,
    pub origin: UnitOrigin,
    /// No working copy exists yet for this annotator.
    pub first_save: bool,
    /// Timestamp of the record the corpus was decoded from; `None` for templates.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Handle to a save running on the blocking pool. Dropping it does not cancel
/// the write.
#[derive(Debug)]
pub struct SaveHandle {
    seq: u64,
    mode: SaveMode,
    task: JoinHandle<Result<UpsertOutcome, StoreError>>,
}

impl SaveHandle {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn mode(&self) -> SaveMode {
        self.mode
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<UpsertOutcome, StoreError> {
        self.task
            .await
            .map_err(|err| StoreError::Join(err.to_string()))?
    }
}

// ---------------------------------------------------------------------------
// PersistenceGateway
// ---------------------------------------------------------------------------

/// Load, save and verify units of work against a [`DocumentStore`].
///
/// Every final save carries a sequence number from a counter shared by all
/// clones of the gateway; the store drops writes that are not newer than the
/// copy it holds.
#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    seq: Arc<AtomicU64>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Sequence number of the most recent dispatch (or of the newest stored
    /// copy seen by `load`).
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DocumentStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|err| StoreError::Join(err.to_string()))?
    }

    /// Fetches the annotator's working copy, falling back to the template.
    pub async fn load(&self, key: &UnitKey) -> Result<LoadedUnit, StoreError> {
        let lookup = key.clone();
        let stored = self
            .run_blocking(move |store| store.find_in_progress(&lookup))
            .await?;

        if let Some(stored) = stored {
            self.seq.fetch_max(stored.seq, Ordering::SeqCst);
            let corpus = Corpus::from_document(&stored.document)?;
            tracing::debug!(key = %key, seq = stored.seq, "loaded working copy");
            return Ok(LoadedUnit {
                corpus,
                origin: UnitOrigin::InProgress,
                first_save: false,
                updated_at: Some(stored.updated_at),
            });
        }

        let unit = key.unit.clone();
        let template = self
            .run_blocking(move |store| store.find_template(&unit))
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("no unit of work {key}")))?;
        let corpus = Corpus::from_document(&template)?;
        tracing::debug!(key = %key, "loaded template");
        Ok(LoadedUnit {
            corpus,
            origin: UnitOrigin::Template,
            first_save: true,
            updated_at: None,
        })
    }

    /// Like [`load`](Self::load), but prefers a draft that is newer than the
    /// working copy. Undecodable drafts are skipped.
    pub async fn load_recovering(&self, key: &UnitKey) -> Result<LoadedUnit, StoreError> {
        let loaded = self.load(key).await?;
        let Some(draft) = self.latest_draft(key).await? else {
            return Ok(loaded);
        };

        let newer = loaded
            .updated_at
            .map_or(true, |updated_at| draft.saved_at > updated_at);
        if !newer {
            return Ok(loaded);
        }

        match Corpus::from_document(&draft.document) {
            Ok(corpus) => {
                tracing::info!(key = %key, saved_at = %draft.saved_at, "recovered draft");
                Ok(LoadedUnit {
                    corpus,
                    origin: UnitOrigin::Draft,
                    first_save: loaded.first_save,
                    updated_at: Some(draft.saved_at),
                })
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "ignoring undecodable draft");
                Ok(loaded)
            }
        }
    }

    /// Dispatches a write of the corpus as it is now. Must be called from
    /// within a tokio runtime; returns without waiting for the store.
    pub fn save(&self, corpus: &Corpus, key: &UnitKey, mode: SaveMode) -> SaveHandle {
        let document = corpus.to_document();
        let now = self.clock.now();
        let store = Arc::clone(&self.store);

        match mode {
            SaveMode::Final => {
                let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
                let unit = StoredUnit {
                    key: key.clone(),
                    document,
                    seq,
                    updated_at: now,
                };
                let task = tokio::task::spawn_blocking(move || {
                    let result = store.upsert_in_progress(&unit);
                    match &result {
                        Ok(outcome) if outcome.stale => {
                            tracing::debug!(key = %unit.key, seq, "discarded stale save");
                        }
                        Ok(_) => tracing::debug!(key = %unit.key, seq, "saved working copy"),
                        Err(err) => {
                            tracing::warn!(key = %unit.key, seq, error = %err, "background save failed");
                        }
                    }
                    result
                });
                SaveHandle { seq, mode, task }
            }
            SaveMode::Draft => {
                let draft = DraftRecord {
                    id: Uuid::new_v4(),
                    key: key.clone(),
                    document,
                    saved_at: now,
                };
                let seq = self.last_seq();
                let task = tokio::task::spawn_blocking(move || {
                    let result = store.insert_draft(&draft).map(|()| UpsertOutcome::inserted());
                    if let Err(err) = &result {
                        tracing::warn!(key = %draft.key, error = %err, "draft save failed");
                    }
                    result
                });
                SaveHandle { seq, mode, task }
            }
        }
    }

    /// Re-reads the working copy and compares it with `corpus`. Any failure to
    /// read counts as a mismatch.
    pub async fn verify_last_save(&self, corpus: &Corpus, key: &UnitKey) -> bool {
        self.verify_detailed(corpus, key).await.is_ok()
    }

    pub async fn verify_detailed(&self, corpus: &Corpus, key: &UnitKey) -> Result<(), IntegrityWarning> {
        let warning = |issue: IntegrityIssue| IntegrityWarning {
            key: key.clone(),
            issue,
        };

        let lookup = key.clone();
        let stored = match self
            .run_blocking(move |store| store.find_in_progress(&lookup))
            .await
        {
            Ok(Some(stored)) => stored,
            Ok(None) => return Err(warning(IntegrityIssue::Missing)),
            Err(err) => return Err(warning(IntegrityIssue::Unreadable(err.to_string()))),
        };
        let saved = Corpus::from_document(&stored.document)
            .map_err(|err| warning(IntegrityIssue::Unreadable(err.to_string())))?;

        let mismatched = mismatched_positions(corpus, &saved);
        if !mismatched.is_empty() {
            return Err(warning(IntegrityIssue::Mismatch(mismatched)));
        }
        if corpus.annotator_name() != saved.annotator_name() {
            return Err(warning(IntegrityIssue::AnnotatorMismatch));
        }
        Ok(())
    }

    pub async fn latest_draft(&self, key: &UnitKey) -> Result<Option<DraftRecord>, StoreError> {
        let lookup = key.clone();
        self.run_blocking(move |store| store.latest_draft(&lookup))
            .await
    }

    pub async fn annotator(&self, name: &AnnotatorId) -> Result<Option<AnnotatorRecord>, StoreError> {
        let name = name.clone();
        self.run_blocking(move |store| store.find_annotator(&name))
            .await
    }

    pub async fn set_unit_index(&self, name: &AnnotatorId, index: usize) -> Result<(), StoreError> {
        let name = name.clone();
        self.run_blocking(move |store| store.set_unit_index(&name, index))
            .await
    }
}

/// Positions of `expected` whose judgments differ in `actual` or are absent from it.
fn mismatched_positions(expected: &Corpus, actual: &Corpus) -> Vec<Cursor> {
    expected
        .positions()
        .filter(|cursor| {
            let Some(want) = expected.annotation_at(*cursor) else {
                return false;
            };
            let Some(got) = actual.annotation_at(*cursor) else {
                return true;
            };
            [JudgmentField::RequiresRewrite, JudgmentField::EnoughContext]
                .into_iter()
                .any(|field| want.judgment(field) != got.judgment(field))
        })
        .collect()
}
