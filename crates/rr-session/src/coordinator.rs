use std::fmt;

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rr_core::core::{
    Annotation, AnnotatorId, ContextTurn, Corpus, Cursor, Dialog, DialogId, IntegrityWarning,
    Judgment, JudgmentField, PositionTracker, Progress, RangeError, RewriteOptionIndex,
    RewriteOptions, UnitId, UnitKey,
};
use rr_store::{
    AnnotatorRecord, LoadedUnit, PersistenceGateway, SaveHandle, SaveMode, StoreError, UnitOrigin,
    UpsertOutcome,
};
use uuid::Uuid;

use crate::error::{JudgmentError, SessionError};

// ---------------------------------------------------------------------------
// Options and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Await a draft snapshot on every persist.
    pub draft_writes: bool,
    /// Prefer a draft newer than the working copy on load.
    pub recover_drafts: bool,
    /// Flush and verify the working copy before leaving a unit.
    pub verify_on_unit_change: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            draft_writes: true,
            recover_drafts: true,
            verify_on_unit_change: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingJudgment,
    Saving,
    Advancing,
    Finished,
}

// ---------------------------------------------------------------------------
// Navigation results
// ---------------------------------------------------------------------------

/// Why a navigation request did not move the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingFields {
        cursor: Cursor,
        fields: Vec<JudgmentField>,
    },
    DialogIncomplete {
        dialog: DialogId,
        first_missing: Cursor,
    },
    UnitUnavailable {
        unit: UnitId,
        reason: String,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingFields { fields, .. } => {
                let labels = fields
                    .iter()
                    .map(|field| field.label())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "please fill in: {labels}")
            }
            Rejection::DialogIncomplete {
                dialog,
                first_missing,
            } => write!(
                f,
                "dialog {dialog} still has unjudged turns, first at {first_missing}"
            ),
            Rejection::UnitUnavailable { unit, reason } => {
                write!(f, "unit {unit} could not be loaded: {reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavOutcome {
    Moved(Cursor),
    /// A different unit of work is now loaded. `warning` reports on the unit
    /// that was left.
    UnitChanged {
        unit: UnitId,
        cursor: Cursor,
        warning: Option<IntegrityWarning>,
    },
    Rejected(Rejection),
    Finished {
        warning: Option<IntegrityWarning>,
    },
    /// Nothing to move to, or the session is finished.
    Unchanged,
}

/// Outcomes of the final saves settled since the previous
/// [`SessionCoordinator::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub applied: usize,
    pub stale: usize,
    pub failed: usize,
}

impl FlushReport {
    fn record(&mut self, result: &Result<UpsertOutcome, StoreError>) {
        match result {
            Ok(outcome) if outcome.stale => self.stale += 1,
            Ok(_) => self.applied += 1,
            Err(_) => self.failed += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionCoordinator
// ---------------------------------------------------------------------------

/// Owns the loaded corpus and is its only mutator. Drives navigation,
/// completion gates and saves for one annotator.
pub struct SessionCoordinator {
    session_id: Uuid,
    gateway: PersistenceGateway,
    options: SessionOptions,
    annotator: AnnotatorId,
    assignment: Option<AnnotatorRecord>,
    key: UnitKey,
    corpus: Corpus,
    tracker: PositionTracker,
    rewrite_options: RewriteOptionIndex,
    state: SessionState,
    dirty: bool,
    in_flight: Vec<SaveHandle>,
    /// Save outcomes not yet handed out by [`SessionCoordinator::flush`].
    settled: FlushReport,
    rng: StdRng,
}

impl SessionCoordinator {
    /// Loads the named unit, or the current unit of the annotator's queue when
    /// `unit` is `None`, and places the cursor on the first incomplete turn.
    pub async fn start(
        gateway: PersistenceGateway,
        annotator: AnnotatorId,
        unit: Option<UnitId>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        if annotator.as_str().trim().is_empty() {
            return Err(SessionError::InvalidAnnotator);
        }

        let record = gateway.annotator(&annotator).await?;
        let (unit, assignment) = match unit {
            Some(unit) => {
                let aligned = record.and_then(|mut record| {
                    record.unit_index = record.units.iter().position(|queued| *queued == unit)?;
                    Some(record)
                });
                (unit, aligned)
            }
            None => {
                let unit = record
                    .as_ref()
                    .and_then(AnnotatorRecord::current_unit)
                    .cloned()
                    .ok_or_else(|| SessionError::NoWork {
                        annotator: annotator.clone(),
                    })?;
                (unit, record)
            }
        };

        let key = UnitKey::new(annotator.clone(), unit);
        let loaded = load_unit(&gateway, &key, options)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => SessionError::UnitNotFound { key: key.clone() },
                other => SessionError::Store(other),
            })?;

        if let Some(record) = &assignment {
            if let Err(err) = gateway.set_unit_index(&annotator, record.unit_index).await {
                tracing::warn!(annotator = %annotator, error = %err, "failed to record queue position");
            }
        }

        let mut rng = StdRng::from_os_rng();
        let rewrite_options = RewriteOptionIndex::build(&loaded.corpus, &mut rng);
        let tracker = PositionTracker::resume(&loaded.corpus);
        let mut session = Self {
            session_id: Uuid::new_v4(),
            gateway,
            options,
            annotator,
            assignment,
            key,
            corpus: loaded.corpus,
            tracker,
            rewrite_options,
            state: SessionState::Idle,
            dirty: false,
            in_flight: Vec::new(),
            settled: FlushReport::default(),
            rng,
        };
        session.activate(loaded.origin, loaded.first_save).await;
        Ok(session)
    }

    // -- accessors ----------------------------------------------------------

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn annotator(&self) -> &AnnotatorId {
        &self.annotator
    }

    pub fn unit_key(&self) -> &UnitKey {
        &self.key
    }

    pub fn assignment(&self) -> Option<&AnnotatorRecord> {
        self.assignment.as_ref()
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// Unsaved judgments exist.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn current_position(&self) -> Cursor {
        self.tracker.cursor()
    }

    pub fn current_dialog(&self) -> Option<(&DialogId, &Dialog)> {
        self.corpus.dialog_at(self.tracker.cursor().dialog_index)
    }

    pub fn current_annotation(&self) -> Option<&Annotation> {
        self.corpus.annotation_at(self.tracker.cursor())
    }

    /// Transcript of the current dialog up to the given annotation slot.
    pub fn current_dialog_context(&self, up_to_turn: usize) -> Result<Vec<ContextTurn<'_>>, RangeError> {
        self.corpus
            .context(self.tracker.cursor().dialog_index, up_to_turn)
    }

    pub fn is_complete(&self, cursor: Cursor) -> bool {
        self.corpus.is_complete(cursor)
    }

    /// Deduplicated, shuffled candidates of the current turn.
    pub fn rewrite_options(&self) -> Option<&RewriteOptions> {
        self.rewrite_options.get(self.tracker.cursor())
    }

    pub fn progress(&self) -> Progress {
        self.corpus.progress()
    }

    // -- judgments ----------------------------------------------------------

    /// Writes a judgment at the cursor. Choosing "no rewrite" implies enough
    /// context; any other rewrite answer resets the context judgment.
    pub fn set_judgment(&mut self, field: JudgmentField, value: Judgment) -> Result<(), JudgmentError> {
        if self.state == SessionState::Finished {
            return Err(JudgmentError::Finished);
        }
        let cursor = self.tracker.cursor();
        let dialog = self
            .current_dialog()
            .map(|(id, _)| id.clone())
            .ok_or(RangeError::DialogIndexOutOfRange {
                index: cursor.dialog_index,
                count: self.corpus.dialog_count(),
            })?;

        if self.context_implied(field) {
            return Err(JudgmentError::ContextImplied);
        }
        let tracks_context = self.corpus.tracks_context();

        self.corpus
            .set_judgment(&dialog, cursor.turn_index, field, value)?;
        if field == JudgmentField::RequiresRewrite && tracks_context {
            let context = match value {
                Judgment::False => Judgment::True,
                Judgment::True | Judgment::Unset => Judgment::Unset,
            };
            self.corpus.set_judgment(
                &dialog,
                cursor.turn_index,
                JudgmentField::EnoughContext,
                context,
            )?;
        }

        self.dirty = true;
        tracing::debug!(
            session = %self.session_id,
            cursor = %cursor,
            field = %field,
            value = %value,
            "judgment set"
        );
        Ok(())
    }

    /// Parses raw reviewer input. Invalid input clears the field and is never
    /// stored.
    pub fn set_judgment_input(&mut self, field: JudgmentField, raw: &str) -> Result<Judgment, JudgmentError> {
        match Judgment::parse_input(raw) {
            Ok(value) => {
                self.set_judgment(field, value)?;
                Ok(value)
            }
            Err(err) => {
                if !self.context_implied(field) {
                    self.set_judgment(field, Judgment::Unset)?;
                }
                tracing::debug!(session = %self.session_id, field = %field, error = %err, "rejected input");
                Err(err.into())
            }
        }
    }

    // -- navigation ---------------------------------------------------------

    /// Moves forward one turn once the current turn is complete. At the end
    /// of a dialog the whole dialog must be judged; at the end of the corpus
    /// the next queued unit is loaded, or the session finishes.
    pub async fn advance(&mut self) -> NavOutcome {
        if self.state == SessionState::Finished {
            return NavOutcome::Unchanged;
        }

        let cursor = self.tracker.cursor();
        let missing = self
            .corpus
            .annotation_at(cursor)
            .map(Annotation::missing_fields)
            .unwrap_or_default();
        if !missing.is_empty() {
            tracing::debug!(session = %self.session_id, cursor = %cursor, ?missing, "advance rejected");
            return NavOutcome::Rejected(Rejection::MissingFields {
                cursor,
                fields: missing,
            });
        }

        self.state = SessionState::Saving;
        self.persist().await;
        self.state = SessionState::Advancing;

        if self.tracker.advance_turn(&self.corpus) {
            return self.moved();
        }
        if let Some(rejection) = self.dialog_gate(cursor.dialog_index) {
            self.state = SessionState::AwaitingJudgment;
            return NavOutcome::Rejected(rejection);
        }
        if self.tracker.advance_dialog(&self.corpus) {
            return self.moved();
        }
        self.next_unit_or_finish().await
    }

    /// Steps back one turn without any gate, saving entered judgments first.
    pub async fn retreat(&mut self) -> NavOutcome {
        if self.state == SessionState::Finished {
            return NavOutcome::Unchanged;
        }
        if self.dirty {
            self.persist().await;
        }
        if self.tracker.retreat_turn(&self.corpus) {
            self.moved()
        } else {
            NavOutcome::Unchanged
        }
    }

    /// Skips to the first turn of the next dialog once every turn of the
    /// current one has a rewrite judgment.
    pub async fn advance_group(&mut self) -> NavOutcome {
        if self.state == SessionState::Finished {
            return NavOutcome::Unchanged;
        }
        if let Some(rejection) = self.dialog_gate(self.tracker.cursor().dialog_index) {
            return NavOutcome::Rejected(rejection);
        }

        self.state = SessionState::Saving;
        self.persist().await;
        self.state = SessionState::Advancing;

        if self.tracker.advance_dialog(&self.corpus) {
            return self.moved();
        }
        self.next_unit_or_finish().await
    }

    /// Moves to the last turn of the previous dialog without any gate.
    pub async fn retreat_group(&mut self) -> NavOutcome {
        if self.state == SessionState::Finished {
            return NavOutcome::Unchanged;
        }
        if self.dirty {
            self.persist().await;
        }
        if self.tracker.retreat_dialog(&self.corpus) {
            self.moved()
        } else {
            NavOutcome::Unchanged
        }
    }

    pub async fn advance_unit(&mut self) -> NavOutcome {
        if self.state == SessionState::Finished {
            return NavOutcome::Unchanged;
        }
        match self.next_unit_index() {
            Some(index) => self.switch_unit(index).await,
            None => NavOutcome::Unchanged,
        }
    }

    pub async fn retreat_unit(&mut self) -> NavOutcome {
        if self.state == SessionState::Finished {
            return NavOutcome::Unchanged;
        }
        let previous = self
            .assignment
            .as_ref()
            .filter(|record| record.has_previous())
            .map(|record| record.unit_index - 1);
        match previous {
            Some(index) => self.switch_unit(index).await,
            None => NavOutcome::Unchanged,
        }
    }

    // -- persistence --------------------------------------------------------

    /// Awaits every save still in flight and hands over the outcomes
    /// collected since the previous flush.
    pub async fn flush(&mut self) -> FlushReport {
        self.settle().await;
        std::mem::take(&mut self.settled)
    }

    /// Saves pending judgments, waits for the store and compares the stored
    /// copy with the corpus.
    pub async fn verify_integrity(&mut self) -> Option<IntegrityWarning> {
        if self.dirty {
            self.persist().await;
        }
        self.settle().await;
        match self.gateway.verify_detailed(&self.corpus, &self.key).await {
            Ok(()) => {
                tracing::debug!(session = %self.session_id, key = %self.key, settled = ?self.settled, "working copy verified");
                None
            }
            Err(warning) => {
                tracing::warn!(session = %self.session_id, warning = %warning, "integrity check failed");
                Some(warning)
            }
        }
    }

    /// Persists unsaved judgments and waits for outstanding saves.
    pub async fn shutdown(&mut self) -> FlushReport {
        if self.dirty {
            self.persist().await;
        }
        let report = self.flush().await;
        tracing::info!(
            session = %self.session_id,
            key = %self.key,
            applied = report.applied,
            failed = report.failed,
            "session closed"
        );
        report
    }

    // -- internals ----------------------------------------------------------

    async fn settle(&mut self) {
        let handles = std::mem::take(&mut self.in_flight);
        for result in join_all(handles.into_iter().map(SaveHandle::wait)).await {
            self.settled.record(&result);
        }
    }

    /// Dispatches a final save, awaits a draft snapshot when enabled.
    async fn persist(&mut self) {
        let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(SaveHandle::is_finished);
        self.in_flight = pending;
        for handle in finished {
            let result = handle.wait().await;
            self.settled.record(&result);
        }

        self.in_flight
            .push(self.gateway.save(&self.corpus, &self.key, SaveMode::Final));

        if self.options.draft_writes {
            let draft = self.gateway.save(&self.corpus, &self.key, SaveMode::Draft);
            if let Err(err) = draft.wait().await {
                tracing::warn!(session = %self.session_id, key = %self.key, error = %err, "draft write failed");
            }
        }
        self.dirty = false;
    }

    async fn activate(&mut self, origin: UnitOrigin, first_save: bool) {
        let renamed = self.corpus.set_annotator_name(self.annotator.as_str());
        if renamed || first_save || origin == UnitOrigin::Draft {
            self.persist().await;
        }
        self.state = SessionState::AwaitingJudgment;
        tracing::info!(
            session = %self.session_id,
            annotator = %self.annotator,
            unit = %self.key.unit,
            cursor = %self.tracker.cursor(),
            ?origin,
            "unit loaded"
        );
    }

    fn context_implied(&self, field: JudgmentField) -> bool {
        field == JudgmentField::EnoughContext
            && self.corpus.tracks_context()
            && self
                .current_annotation()
                .is_some_and(|annotation| annotation.requires_rewrite == Judgment::False)
    }

    fn moved(&mut self) -> NavOutcome {
        self.state = SessionState::AwaitingJudgment;
        let cursor = self.tracker.cursor();
        tracing::debug!(session = %self.session_id, cursor = %cursor, "cursor moved");
        NavOutcome::Moved(cursor)
    }

    fn dialog_gate(&self, dialog_index: usize) -> Option<Rejection> {
        if self.corpus.all_turns_filled(dialog_index) {
            return None;
        }
        let (dialog, entry) = self.corpus.dialog_at(dialog_index)?;
        let turn_index = entry
            .annotations()
            .iter()
            .position(|annotation| !annotation.requires_rewrite.is_set())?;
        Some(Rejection::DialogIncomplete {
            dialog: dialog.clone(),
            first_missing: Cursor::new(dialog_index, turn_index),
        })
    }

    fn next_unit_index(&self) -> Option<usize> {
        self.assignment
            .as_ref()
            .filter(|record| record.has_next())
            .map(|record| record.unit_index + 1)
    }

    async fn next_unit_or_finish(&mut self) -> NavOutcome {
        match self.next_unit_index() {
            Some(index) => self.switch_unit(index).await,
            None => self.finish().await,
        }
    }

    async fn finish(&mut self) -> NavOutcome {
        let warning = self.leave_unit().await;

        let finished_index = self.assignment.as_mut().map(|record| {
            record.unit_index = record.units.len();
            record.unit_index
        });
        if let Some(index) = finished_index {
            if let Err(err) = self.gateway.set_unit_index(&self.annotator, index).await {
                tracing::warn!(annotator = %self.annotator, error = %err, "failed to record queue position");
            }
        }

        self.state = SessionState::Finished;
        tracing::info!(session = %self.session_id, annotator = %self.annotator, "all assigned work finished");
        NavOutcome::Finished { warning }
    }

    async fn leave_unit(&mut self) -> Option<IntegrityWarning> {
        if self.options.verify_on_unit_change {
            return self.verify_integrity().await;
        }
        if self.dirty {
            self.persist().await;
        }
        self.settle().await;
        None
    }

    async fn switch_unit(&mut self, index: usize) -> NavOutcome {
        let Some(unit) = self
            .assignment
            .as_ref()
            .and_then(|record| record.units.get(index))
            .cloned()
        else {
            return NavOutcome::Unchanged;
        };

        let warning = self.leave_unit().await;
        self.state = SessionState::Idle;

        let key = UnitKey::new(self.annotator.clone(), unit.clone());
        let loaded = match load_unit(&self.gateway, &key, self.options).await {
            Ok(loaded) => loaded,
            Err(err) => {
                tracing::warn!(session = %self.session_id, key = %key, error = %err, "unit unavailable");
                self.state = SessionState::AwaitingJudgment;
                return NavOutcome::Rejected(Rejection::UnitUnavailable {
                    unit,
                    reason: err.to_string(),
                });
            }
        };

        if let Err(err) = self.gateway.set_unit_index(&self.annotator, index).await {
            tracing::warn!(annotator = %self.annotator, error = %err, "failed to record queue position");
        }
        if let Some(record) = self.assignment.as_mut() {
            record.unit_index = index;
        }

        self.rewrite_options = RewriteOptionIndex::build(&loaded.corpus, &mut self.rng);
        self.tracker = PositionTracker::resume(&loaded.corpus);
        self.corpus = loaded.corpus;
        self.key = key;
        self.activate(loaded.origin, loaded.first_save).await;

        NavOutcome::UnitChanged {
            unit,
            cursor: self.tracker.cursor(),
            warning,
        }
    }
}

async fn load_unit(
    gateway: &PersistenceGateway,
    key: &UnitKey,
    options: SessionOptions,
) -> Result<LoadedUnit, StoreError> {
    if options.recover_drafts {
        gateway.load_recovering(key).await
    } else {
        gateway.load(key).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rr_store::{DocumentStore, DraftRecord, SqliteDocumentStore, StoredUnit};
    use serde_json::{json, Value};

    use super::*;

    fn context_document() -> Value {
        json!({
            "dlg-a": {
                "dialog": [
                    {"turn_num": 0, "original_question": "Tell me about Mars.", "answer": "A planet."},
                    {"turn_num": 1, "original_question": "How far is it?", "answer": "Far."},
                    {"turn_num": 2, "original_question": "And its moons?", "answer": "Two."}
                ],
                "1": {
                    "requires_rewrite": null,
                    "enough_context": null,
                    "rewrite_a": {"text": "How far is Mars?", "score": 0.9, "optimal": true},
                    "rewrite_b": {"text": "How far is Mars?", "score": 0.7, "optimal": false}
                },
                "2": {"requires_rewrite": null, "enough_context": null},
                "annotator_id": null
            }
        })
    }

    fn seeded_store(document: &Value) -> SqliteDocumentStore {
        let store = SqliteDocumentStore::new_in_memory().unwrap();
        store.init().unwrap();
        store
            .upsert_template(&UnitId::new("unit-1"), document)
            .unwrap();
        store
    }

    async fn start_session(document: Value) -> SessionCoordinator {
        start_on(Arc::new(seeded_store(&document))).await
    }

    async fn start_on(store: Arc<dyn DocumentStore>) -> SessionCoordinator {
        let gateway = PersistenceGateway::new(store);
        SessionCoordinator::start(
            gateway,
            AnnotatorId::new("dana"),
            Some(UnitId::new("unit-1")),
            SessionOptions::default(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_rejection_messages() {
        let missing = Rejection::MissingFields {
            cursor: Cursor::new(0, 1),
            fields: vec![JudgmentField::RequiresRewrite, JudgmentField::EnoughContext],
        };
        assert_eq!(
            missing.to_string(),
            "please fill in: Requires Rewrite, Enough Context"
        );

        let incomplete = Rejection::DialogIncomplete {
            dialog: DialogId::new("dlg-a"),
            first_missing: Cursor::new(0, 0),
        };
        assert_eq!(
            incomplete.to_string(),
            "dialog dlg-a still has unjudged turns, first at (0, 0)"
        );
    }

    #[tokio::test]
    async fn test_start_propagates_annotator_name() {
        let session = start_session(context_document()).await;

        assert_eq!(session.state(), SessionState::AwaitingJudgment);
        assert_eq!(session.corpus().annotator_name(), Some("dana"));
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn test_no_rewrite_implies_enough_context() {
        let mut session = start_session(context_document()).await;

        session
            .set_judgment(JudgmentField::RequiresRewrite, Judgment::False)
            .unwrap();
        let annotation = session.current_annotation().unwrap();
        assert_eq!(annotation.enough_context, Some(Judgment::True));
        assert!(session.is_dirty());

        let err = session
            .set_judgment(JudgmentField::EnoughContext, Judgment::False)
            .unwrap_err();
        assert_eq!(err, JudgmentError::ContextImplied);
    }

    #[tokio::test]
    async fn test_rewrite_resets_enough_context() {
        let mut session = start_session(context_document()).await;

        session
            .set_judgment(JudgmentField::RequiresRewrite, Judgment::False)
            .unwrap();
        session
            .set_judgment(JudgmentField::RequiresRewrite, Judgment::True)
            .unwrap();

        let annotation = session.current_annotation().unwrap();
        assert_eq!(annotation.enough_context, Some(Judgment::Unset));
        assert_eq!(
            annotation.missing_fields(),
            vec![JudgmentField::EnoughContext]
        );
    }

    #[tokio::test]
    async fn test_rewrite_options_are_deduplicated() {
        let session = start_session(context_document()).await;

        let options = session.rewrite_options().unwrap();
        assert_eq!(options.presentation_order.len(), 1);
        assert_eq!(options.key_count(), 2);
    }

    #[tokio::test]
    async fn test_context_withholds_answer_of_judged_turn() {
        let session = start_session(context_document()).await;

        let context = session.current_dialog_context(0).unwrap();
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].answer, Some("A planet."));
        assert_eq!(context[1].question, "How far is it?");
        assert_eq!(context[1].answer, None);

        assert!(session.current_dialog_context(5).is_err());
    }

    #[tokio::test]
    async fn test_advance_group_requires_filled_dialog() {
        let mut session = start_session(context_document()).await;

        let outcome = session.advance_group().await;
        assert_eq!(
            outcome,
            NavOutcome::Rejected(Rejection::DialogIncomplete {
                dialog: DialogId::new("dlg-a"),
                first_missing: Cursor::new(0, 0),
            })
        );
        assert_eq!(session.current_position(), Cursor::new(0, 0));
    }

    #[tokio::test]
    async fn test_finished_session_ignores_navigation() {
        let mut session = start_session(context_document()).await;

        for _ in 0..2 {
            session
                .set_judgment(JudgmentField::RequiresRewrite, Judgment::False)
                .unwrap();
            session.advance().await;
        }
        assert_eq!(session.state(), SessionState::Finished);

        assert_eq!(session.retreat().await, NavOutcome::Unchanged);
        assert_eq!(session.advance().await, NavOutcome::Unchanged);
        assert_eq!(
            session.set_judgment(JudgmentField::RequiresRewrite, Judgment::True),
            Err(JudgmentError::Finished)
        );
    }

    /// Sqlite store whose working-copy writes always fail.
    struct ReadOnlyStore(SqliteDocumentStore);

    impl DocumentStore for ReadOnlyStore {
        fn init(&self) -> Result<(), StoreError> {
            self.0.init()
        }
        fn find_template(&self, unit: &UnitId) -> Result<Option<Value>, StoreError> {
            self.0.find_template(unit)
        }
        fn upsert_template(&self, unit: &UnitId, document: &Value) -> Result<UpsertOutcome, StoreError> {
            self.0.upsert_template(unit, document)
        }
        fn list_templates(&self) -> Result<Vec<UnitId>, StoreError> {
            self.0.list_templates()
        }
        fn find_in_progress(&self, key: &UnitKey) -> Result<Option<StoredUnit>, StoreError> {
            self.0.find_in_progress(key)
        }
        fn upsert_in_progress(&self, _: &StoredUnit) -> Result<UpsertOutcome, StoreError> {
            Err(StoreError::Unavailable("disk is read-only".into()))
        }
        fn list_in_progress(&self) -> Result<Vec<StoredUnit>, StoreError> {
            self.0.list_in_progress()
        }
        fn insert_draft(&self, draft: &DraftRecord) -> Result<(), StoreError> {
            self.0.insert_draft(draft)
        }
        fn latest_draft(&self, key: &UnitKey) -> Result<Option<DraftRecord>, StoreError> {
            self.0.latest_draft(key)
        }
        fn find_annotator(&self, name: &AnnotatorId) -> Result<Option<AnnotatorRecord>, StoreError> {
            self.0.find_annotator(name)
        }
        fn upsert_annotator(&self, record: &AnnotatorRecord) -> Result<(), StoreError> {
            self.0.upsert_annotator(record)
        }
        fn list_annotators(&self) -> Result<Vec<AnnotatorRecord>, StoreError> {
            self.0.list_annotators()
        }
        fn set_unit_index(&self, name: &AnnotatorId, index: usize) -> Result<(), StoreError> {
            self.0.set_unit_index(name, index)
        }
    }

    async fn wait_for_saves(session: &SessionCoordinator) {
        while session.in_flight.iter().any(|handle| !handle.is_finished()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_reports_saves_that_failed_earlier() {
        let store = ReadOnlyStore(seeded_store(&context_document()));
        let mut session = start_on(Arc::new(store)).await;
        wait_for_saves(&session).await;

        session
            .set_judgment(JudgmentField::RequiresRewrite, Judgment::True)
            .unwrap();
        assert_eq!(session.retreat().await, NavOutcome::Unchanged);
        wait_for_saves(&session).await;
        assert!(session.verify_integrity().await.is_some());

        let report = session.shutdown().await;
        assert_eq!(
            report,
            FlushReport {
                applied: 0,
                stale: 0,
                failed: 2,
            }
        );
        assert_eq!(session.flush().await, FlushReport::default());
    }
}
