use chrono::{DateTime, Utc};
use rr_core::core::{AnnotatorId, Corpus, DialogId, Judgment, UnitId, UnitKey};
use serde::Serialize;

use crate::store::{DocumentStore, StoreError};

/// One judged turn of one annotator's working copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationRow {
    /// Name recorded in the document, falling back to the store key.
    pub annotator_name: String,
    pub annotator: AnnotatorId,
    pub unit: UnitId,
    pub dialog_id: DialogId,
    pub turn_num: u32,
    pub original_question: String,
    pub requires_rewrite: Option<bool>,
    pub enough_context: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub annotator: Option<AnnotatorId>,
    pub unit: Option<UnitId>,
    /// Skip turns whose `requires_rewrite` is still unset.
    pub judged_only: bool,
}

impl ExportFilter {
    fn accepts(&self, key: &UnitKey) -> bool {
        self.annotator.as_ref().map_or(true, |a| *a == key.annotator)
            && self.unit.as_ref().map_or(true, |u| *u == key.unit)
    }
}

/// Flattens one corpus into rows, one per annotation slot.
pub fn rows_from_corpus(key: &UnitKey, corpus: &Corpus) -> Vec<AnnotationRow> {
    let annotator_name = corpus
        .annotator_name()
        .map_or_else(|| key.annotator.to_string(), ToOwned::to_owned);

    let mut rows = Vec::new();
    for (dialog_id, dialog) in corpus.dialogs() {
        for annotation in dialog.annotations() {
            let original_question = dialog
                .turns()
                .iter()
                .find(|turn| turn.turn_num == annotation.turn_num)
                .map(|turn| turn.original_question.clone())
                .unwrap_or_default();
            rows.push(AnnotationRow {
                annotator_name: annotator_name.clone(),
                annotator: key.annotator.clone(),
                unit: key.unit.clone(),
                dialog_id: dialog_id.clone(),
                turn_num: annotation.turn_num,
                original_question,
                requires_rewrite: annotation.requires_rewrite.as_bool(),
                enough_context: annotation.enough_context.and_then(Judgment::as_bool),
            });
        }
    }
    rows
}

/// Aggregates rows across every stored working copy.
///
/// Copies that no longer decode are skipped with a warning rather than
/// failing the whole export.
pub fn export_rows(
    store: &dyn DocumentStore,
    filter: &ExportFilter,
) -> Result<Vec<AnnotationRow>, StoreError> {
    let mut rows = Vec::new();
    for stored in store.list_in_progress()? {
        if !filter.accepts(&stored.key) {
            continue;
        }
        let corpus = match Corpus::from_document(&stored.document) {
            Ok(corpus) => corpus,
            Err(err) => {
                tracing::warn!(key = %stored.key, error = %err, "skipping undecodable working copy");
                continue;
            }
        };
        rows.extend(
            rows_from_corpus(&stored.key, &corpus)
                .into_iter()
                .filter(|row| !filter.judged_only || row.requires_rewrite.is_some()),
        );
    }
    Ok(rows)
}

pub fn export_to_json(rows: &[AnnotationRow]) -> Result<String, StoreError> {
    let json = serde_json::to_string_pretty(rows)?;
    Ok(json)
}

const CSV_HEADER: [&str; 7] = [
    "AnnotatorName",
    "Unit",
    "DialogID",
    "TurnNum",
    "OgQuestion",
    "RequiresRewrite",
    "EnoughContext",
];

/// Renders rows as RFC 4180 CSV. Unset judgments are empty cells.
pub fn export_to_csv(rows: &[AnnotationRow]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.join(","));
    out.push_str("\r\n");
    for row in rows {
        let cells = [
            csv_cell(&row.annotator_name),
            csv_cell(row.unit.as_str()),
            csv_cell(row.dialog_id.as_str()),
            row.turn_num.to_string(),
            csv_cell(&row.original_question),
            judgment_cell(row.requires_rewrite),
            judgment_cell(row.enough_context),
        ];
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }
    out
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_owned()
    }
}

fn judgment_cell(value: Option<bool>) -> String {
    match value {
        Some(true) => "1".to_owned(),
        Some(false) => "0".to_owned(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitProgress {
    pub annotator: AnnotatorId,
    pub unit: UnitId,
    pub completed: usize,
    pub total: usize,
    pub updated_at: DateTime<Utc>,
}

impl UnitProgress {
    pub fn is_finished(&self) -> bool {
        self.completed == self.total
    }
}

/// Completion counts for every working copy matching the filter.
pub fn progress_summary(
    store: &dyn DocumentStore,
    filter: &ExportFilter,
) -> Result<Vec<UnitProgress>, StoreError> {
    let mut summary = Vec::new();
    for stored in store.list_in_progress()? {
        if !filter.accepts(&stored.key) {
            continue;
        }
        let corpus = match Corpus::from_document(&stored.document) {
            Ok(corpus) => corpus,
            Err(err) => {
                tracing::warn!(key = %stored.key, error = %err, "skipping undecodable working copy");
                continue;
            }
        };
        let progress = corpus.progress();
        summary.push(UnitProgress {
            annotator: stored.key.annotator,
            unit: stored.key.unit,
            completed: progress.completed,
            total: progress.total,
            updated_at: stored.updated_at,
        });
    }
    Ok(summary)
}
