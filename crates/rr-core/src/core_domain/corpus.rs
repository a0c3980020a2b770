use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::core::{
    CandidateKey, CorpusSchema, Cursor, DialogId, FieldSpelling, Judgment, JudgmentField,
    RangeError, SchemaError,
};

// ---------------------------------------------------------------------------
// Turn: one question/answer exchange, immutable once loaded
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub turn_num: u32,
    pub original_question: String,
    pub answer: String,
    /// Fields the tool does not interpret, kept for lossless re-encoding.
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// RewriteCandidate: a proposed rewrite of a turn's question
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RewriteCandidate {
    pub text: String,
    pub score: f64,
    pub optimal: bool,
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Annotation: judgment fields attached to one turn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Number of the turn this annotation judges.
    pub turn_num: u32,
    pub requires_rewrite: Judgment,
    /// Key spelling `requires_rewrite` was read with; written back unchanged.
    pub spelling: FieldSpelling,
    /// `None` when the corpus schema does not carry the field.
    pub enough_context: Option<Judgment>,
    pub rewrite_candidates: IndexMap<CandidateKey, RewriteCandidate>,
    pub extra: Map<String, Value>,
}

impl Annotation {
    pub fn judgment(&self, field: JudgmentField) -> Option<Judgment> {
        match field {
            JudgmentField::RequiresRewrite => Some(self.requires_rewrite),
            JudgmentField::EnoughContext => self.enough_context,
        }
    }

    /// Gated fields that are still unset, in display order.
    pub fn missing_fields(&self) -> Vec<JudgmentField> {
        let mut missing = Vec::new();
        if !self.requires_rewrite.is_set() {
            missing.push(JudgmentField::RequiresRewrite);
        }
        if self.enough_context.is_some_and(|j| !j.is_set()) {
            missing.push(JudgmentField::EnoughContext);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Dialog: a transcript plus one annotation per judged turn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Dialog {
    turns: Vec<Turn>,
    annotations: Vec<Annotation>,
    annotator_name: Option<String>,
    legacy_annotator_key: bool,
    extra: Map<String, Value>,
}

impl Dialog {
    /// The first turn is context only, so a dialog carries exactly one
    /// annotation per remaining turn. A single-turn dialog has none.
    pub fn new(
        id: &str,
        turns: Vec<Turn>,
        annotations: Vec<Annotation>,
        annotator_name: Option<String>,
        extra: Map<String, Value>,
    ) -> Result<Self, SchemaError> {
        if annotations.len() + 1 != turns.len() {
            return Err(SchemaError::AnnotationCountMismatch {
                dialog: id.to_owned(),
                annotations: annotations.len(),
                turns: turns.len(),
            });
        }
        Ok(Self {
            turns,
            annotations,
            annotator_name,
            legacy_annotator_key: false,
            extra,
        })
    }

    /// Marks a dialog whose document names the annotator under
    /// `annotator_name`; that key is then written back next to `annotator_id`.
    pub fn with_legacy_annotator_key(mut self, legacy: bool) -> Self {
        self.legacy_annotator_key = legacy;
        self
    }

    pub fn has_legacy_annotator_key(&self) -> bool {
        self.legacy_annotator_key
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn annotator_name(&self) -> Option<&str> {
        self.annotator_name.as_deref()
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn all_turns_filled(&self) -> bool {
        self.annotations
            .iter()
            .all(|annotation| annotation.requires_rewrite.is_set())
    }
}

// ---------------------------------------------------------------------------
// ContextTurn: one line of the transcript shown to the reviewer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTurn<'a> {
    pub turn_num: u32,
    pub question: &'a str,
    /// `None` for the turn under judgment.
    pub answer: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Corpus: ordered dialogs of one unit of work
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    dialogs: IndexMap<DialogId, Dialog>,
    schema: CorpusSchema,
}

impl Corpus {
    pub fn new(dialogs: IndexMap<DialogId, Dialog>, schema: CorpusSchema) -> Result<Self, SchemaError> {
        if dialogs.values().all(|dialog| dialog.annotations.is_empty()) {
            return Err(SchemaError::Empty);
        }
        for (id, dialog) in &dialogs {
            let tracked = dialog
                .annotations
                .iter()
                .all(|a| a.enough_context.is_some() == schema.tracks_context);
            if !tracked {
                return Err(SchemaError::invalid(
                    id.as_str(),
                    "enough_context presence disagrees with corpus schema",
                ));
            }
        }
        Ok(Self { dialogs, schema })
    }

    pub fn schema(&self) -> CorpusSchema {
        self.schema
    }

    pub fn tracks_context(&self) -> bool {
        self.schema.tracks_context
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    pub fn dialogs(&self) -> impl Iterator<Item = (&DialogId, &Dialog)> {
        self.dialogs.iter()
    }

    pub fn dialog(&self, id: &DialogId) -> Option<&Dialog> {
        self.dialogs.get(id)
    }

    pub fn dialog_at(&self, index: usize) -> Option<(&DialogId, &Dialog)> {
        self.dialogs.get_index(index)
    }

    pub fn dialog_index(&self, id: &DialogId) -> Option<usize> {
        self.dialogs.get_index_of(id)
    }

    /// Number of annotation slots of the dialog at `dialog_index`, zero if out of range.
    pub fn annotation_count(&self, dialog_index: usize) -> usize {
        self.dialog_at(dialog_index)
            .map_or(0, |(_, dialog)| dialog.annotations.len())
    }

    pub fn annotation(&self, dialog: &DialogId, turn_index: usize) -> Result<&Annotation, RangeError> {
        let entry = self
            .dialogs
            .get(dialog)
            .ok_or_else(|| RangeError::DialogNotFound {
                dialog: dialog.clone(),
            })?;
        entry
            .annotations
            .get(turn_index)
            .ok_or_else(|| RangeError::TurnOutOfRange {
                dialog: dialog.clone(),
                index: turn_index,
                count: entry.annotations.len(),
            })
    }

    pub fn annotation_at(&self, cursor: Cursor) -> Option<&Annotation> {
        self.dialog_at(cursor.dialog_index)
            .and_then(|(_, dialog)| dialog.annotations.get(cursor.turn_index))
    }

    pub fn contains(&self, cursor: Cursor) -> bool {
        self.annotation_at(cursor).is_some()
    }

    pub fn set_judgment(
        &mut self,
        dialog: &DialogId,
        turn_index: usize,
        field: JudgmentField,
        value: Judgment,
    ) -> Result<(), RangeError> {
        let entry = self
            .dialogs
            .get_mut(dialog)
            .ok_or_else(|| RangeError::DialogNotFound {
                dialog: dialog.clone(),
            })?;
        let count = entry.annotations.len();
        let annotation =
            entry
                .annotations
                .get_mut(turn_index)
                .ok_or_else(|| RangeError::TurnOutOfRange {
                    dialog: dialog.clone(),
                    index: turn_index,
                    count,
                })?;

        match field {
            JudgmentField::RequiresRewrite => annotation.requires_rewrite = value,
            JudgmentField::EnoughContext => match annotation.enough_context.as_mut() {
                Some(slot) => *slot = value,
                None => return Err(RangeError::FieldNotTracked { field }),
            },
        }
        Ok(())
    }

    /// Annotator name of the first dialog; names are kept uniform corpus-wide.
    pub fn annotator_name(&self) -> Option<&str> {
        self.dialogs
            .values()
            .next()
            .and_then(|dialog| dialog.annotator_name())
            .filter(|name| !name.trim().is_empty())
    }

    /// Sets the annotator name on every dialog. Returns whether anything changed.
    pub fn set_annotator_name(&mut self, name: &str) -> bool {
        let mut changed = false;
        for dialog in self.dialogs.values_mut() {
            if dialog.annotator_name.as_deref() != Some(name) {
                dialog.annotator_name = Some(name.to_owned());
                changed = true;
            }
        }
        changed
    }

    pub fn all_turns_filled(&self, dialog_index: usize) -> bool {
        self.dialog_at(dialog_index)
            .is_some_and(|(_, dialog)| dialog.all_turns_filled())
    }

    pub fn is_complete(&self, cursor: Cursor) -> bool {
        self.annotation_at(cursor).is_some_and(Annotation::is_complete)
    }

    /// Transcript up to and including the judged turn, answer withheld for that turn.
    pub fn context(&self, dialog_index: usize, up_to_turn: usize) -> Result<Vec<ContextTurn<'_>>, RangeError> {
        let (id, dialog) = self
            .dialog_at(dialog_index)
            .ok_or(RangeError::DialogIndexOutOfRange {
                index: dialog_index,
                count: self.dialogs.len(),
            })?;
        let annotation =
            dialog
                .annotations
                .get(up_to_turn)
                .ok_or_else(|| RangeError::TurnOutOfRange {
                    dialog: id.clone(),
                    index: up_to_turn,
                    count: dialog.annotations.len(),
                })?;
        let target = annotation.turn_num;

        Ok(dialog
            .turns
            .iter()
            .filter(|turn| turn.turn_num <= target)
            .map(|turn| ContextTurn {
                turn_num: turn.turn_num,
                question: turn.original_question.as_str(),
                answer: (turn.turn_num != target).then_some(turn.answer.as_str()),
            })
            .collect())
    }

    /// Every valid cursor in navigation order.
    pub fn positions(&self) -> impl Iterator<Item = Cursor> + '_ {
        self.dialogs
            .values()
            .enumerate()
            .flat_map(|(dialog_index, dialog)| {
                (0..dialog.annotations.len()).map(move |turn_index| Cursor::new(dialog_index, turn_index))
            })
    }

    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for cursor in self.positions() {
            progress.total += 1;
            if self.is_complete(cursor) {
                progress.completed += 1;
            }
        }
        progress
    }

    pub(crate) fn dialogs_map(&self) -> &IndexMap<DialogId, Dialog> {
        &self.dialogs
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_finished(&self) -> bool {
        self.completed == self.total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
