use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::flat_codec::FlatAnnotationsCodec;
use super::turn_keyed_codec::TurnKeyedCodec;
use crate::core::{
    Annotation, CandidateKey, Corpus, Dialog, DialogId, Judgment, RewriteCandidate, SchemaError,
    Turn,
};

pub(crate) const DIALOG_KEY: &str = "dialog";
pub(crate) const ANNOTATOR_KEY: &str = "annotator_id";
pub(crate) const LEGACY_ANNOTATOR_KEY: &str = "annotator_name";
pub(crate) const ENOUGH_CONTEXT_KEY: &str = "enough_context";

// ---------------------------------------------------------------------------
// CorpusSchema: which of the observed document shapes a corpus uses
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `dialog` list plus a flat `annotations` list, one entry per judged turn.
    FlatAnnotations,
    /// One object per judged turn, keyed by the stringified turn number.
    TurnKeyed,
}

/// Spelling of the rewrite judgment key; both occur in the wild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldSpelling {
    Underscore,
    Space,
}

impl FieldSpelling {
    pub fn requires_rewrite_key(self) -> &'static str {
        match self {
            FieldSpelling::Underscore => "requires_rewrite",
            FieldSpelling::Space => "requires rewrite",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorpusSchema {
    pub layout: Layout,
    pub spelling: FieldSpelling,
    pub tracks_context: bool,
}

// ---------------------------------------------------------------------------
// CorpusCodec: converts one layout to and from the canonical model
// ---------------------------------------------------------------------------

pub trait CorpusCodec: Send + Sync {
    fn layout(&self) -> Layout;

    /// Whether a raw dialog object is laid out the way this codec expects.
    fn recognizes(&self, dialog: &Map<String, Value>) -> bool;

    /// Raw annotation objects of a dialog, used to detect field names.
    fn raw_annotations<'a>(&self, dialog: &'a Map<String, Value>) -> Vec<&'a Map<String, Value>>;

    fn decode_dialog(
        &self,
        id: &str,
        dialog: &Map<String, Value>,
        schema: CorpusSchema,
    ) -> Result<Dialog, SchemaError>;

    fn encode_dialog(&self, dialog: &Dialog) -> Map<String, Value>;
}

static FLAT_CODEC: FlatAnnotationsCodec = FlatAnnotationsCodec;
static TURN_KEYED_CODEC: TurnKeyedCodec = TurnKeyedCodec;

pub fn codec_for(layout: Layout) -> &'static dyn CorpusCodec {
    match layout {
        Layout::FlatAnnotations => &FLAT_CODEC,
        Layout::TurnKeyed => &TURN_KEYED_CODEC,
    }
}

const CODECS: [Layout; 2] = [Layout::FlatAnnotations, Layout::TurnKeyed];

/// Detects the layout from the first dialog a codec recognizes and field
/// spellings from all annotation objects.
pub fn detect_schema(document: &Value) -> Result<CorpusSchema, SchemaError> {
    let dialogs = document.as_object().ok_or(SchemaError::NotAnObject)?;
    if dialogs.is_empty() {
        return Err(SchemaError::Empty);
    }
    let mut objects = Vec::with_capacity(dialogs.len());
    for (id, value) in dialogs {
        let dialog = value
            .as_object()
            .ok_or_else(|| SchemaError::invalid(id, "dialog is not an object"))?;
        objects.push(dialog);
    }

    let codec = objects
        .iter()
        .find_map(|dialog| recognizing_codec(dialog))
        .ok_or_else(|| {
            SchemaError::Undetected(
                "no dialog has an annotations list or turn-numbered entries".to_owned(),
            )
        })?;

    let mut underscore = false;
    let mut space = false;
    let mut tracks_context = false;
    for raw in objects {
        for annotation in codec.raw_annotations(raw) {
            underscore |= annotation.contains_key(FieldSpelling::Underscore.requires_rewrite_key());
            space |= annotation.contains_key(FieldSpelling::Space.requires_rewrite_key());
            tracks_context |= annotation.contains_key(ENOUGH_CONTEXT_KEY);
        }
    }

    let spelling = match (underscore, space) {
        (true, _) => FieldSpelling::Underscore,
        (false, true) => FieldSpelling::Space,
        (false, false) => {
            return Err(SchemaError::Undetected(
                "no annotation carries a requires_rewrite field".to_owned(),
            ))
        }
    };

    Ok(CorpusSchema {
        layout: codec.layout(),
        spelling,
        tracks_context,
    })
}

fn recognizing_codec(dialog: &Map<String, Value>) -> Option<&'static dyn CorpusCodec> {
    CODECS
        .iter()
        .map(|layout| codec_for(*layout))
        .find(|codec| codec.recognizes(dialog))
}

impl Corpus {
    pub fn from_document(document: &Value) -> Result<Self, SchemaError> {
        let schema = detect_schema(document)?;
        let codec = codec_for(schema.layout);
        let raw = document.as_object().ok_or(SchemaError::NotAnObject)?;

        let mut dialogs = IndexMap::with_capacity(raw.len());
        for (id, value) in raw {
            let dialog = value
                .as_object()
                .ok_or_else(|| SchemaError::invalid(id, "dialog is not an object"))?;
            // a single-turn dialog has no slots for any codec to recognize
            if !codec.recognizes(dialog) && recognizing_codec(dialog).is_some() {
                return Err(SchemaError::invalid(
                    id,
                    "layout differs from the rest of the corpus",
                ));
            }
            dialogs.insert(DialogId::new(id), codec.decode_dialog(id, dialog, schema)?);
        }
        Corpus::new(dialogs, schema)
    }

    pub fn to_document(&self) -> Value {
        let schema = self.schema();
        let codec = codec_for(schema.layout);
        let dialogs = self
            .dialogs_map()
            .iter()
            .map(|(id, dialog)| {
                (
                    id.as_str().to_owned(),
                    Value::Object(codec.encode_dialog(dialog)),
                )
            })
            .collect::<Map<_, _>>();
        Value::Object(dialogs)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        let document: Value = serde_json::from_str(raw)?;
        Self::from_document(&document)
    }

    pub fn to_json_pretty(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }
}

// ---------------------------------------------------------------------------
// Shared field adapters
// ---------------------------------------------------------------------------

pub(crate) fn decode_turns(id: &str, dialog: &Map<String, Value>) -> Result<Vec<Turn>, SchemaError> {
    let raw_turns = dialog
        .get(DIALOG_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| SchemaError::invalid(id, "missing dialog list"))?;

    raw_turns
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let mut fields = raw
                .as_object()
                .cloned()
                .ok_or_else(|| SchemaError::invalid(id, format!("turn {index} is not an object")))?;
            let turn_num = fields
                .remove("turn_num")
                .and_then(|v| v.as_u64())
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| SchemaError::invalid(id, format!("turn {index} has no turn_num")))?;
            let original_question = take_string(&mut fields, "original_question");
            let answer = take_string(&mut fields, "answer");
            Ok(Turn {
                turn_num,
                original_question,
                answer,
                extra: fields,
            })
        })
        .collect()
}

pub(crate) fn encode_turns(turns: &[Turn]) -> Value {
    Value::Array(
        turns
            .iter()
            .map(|turn| {
                let mut fields = Map::new();
                fields.insert("turn_num".to_owned(), Value::from(turn.turn_num));
                fields.insert(
                    "original_question".to_owned(),
                    Value::from(turn.original_question.clone()),
                );
                fields.insert("answer".to_owned(), Value::from(turn.answer.clone()));
                fields.extend(turn.extra.clone());
                Value::Object(fields)
            })
            .collect(),
    )
}

/// Builds the dialog, remembering which key named its annotator.
pub(crate) fn assemble_dialog(
    id: &str,
    raw: &Map<String, Value>,
    turns: Vec<Turn>,
    annotations: Vec<Annotation>,
    extra: Map<String, Value>,
) -> Result<Dialog, SchemaError> {
    let annotator_name = raw
        .get(ANNOTATOR_KEY)
        .filter(|value| !value.is_null())
        .or_else(|| raw.get(LEGACY_ANNOTATOR_KEY))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned);
    let dialog = Dialog::new(id, turns, annotations, annotator_name, extra)?;
    Ok(dialog.with_legacy_annotator_key(raw.contains_key(LEGACY_ANNOTATOR_KEY)))
}

pub(crate) fn encode_annotator(fields: &mut Map<String, Value>, dialog: &Dialog) {
    let name = dialog.annotator_name().map_or(Value::Null, Value::from);
    if dialog.has_legacy_annotator_key() {
        fields.insert(LEGACY_ANNOTATOR_KEY.to_owned(), name.clone());
    }
    fields.insert(ANNOTATOR_KEY.to_owned(), name);
}

pub(crate) fn is_reserved_dialog_key(key: &str) -> bool {
    matches!(key, DIALOG_KEY | ANNOTATOR_KEY | LEGACY_ANNOTATOR_KEY)
}

pub(crate) fn decode_annotation(
    id: &str,
    turn_num: u32,
    raw: &Map<String, Value>,
    schema: CorpusSchema,
) -> Result<Annotation, SchemaError> {
    let underscore = raw.get(FieldSpelling::Underscore.requires_rewrite_key());
    let space = raw.get(FieldSpelling::Space.requires_rewrite_key());
    let (spelling, stored) = match (underscore, space) {
        (Some(_), Some(_)) => {
            return Err(SchemaError::invalid(
                id,
                format!("turn {turn_num} carries both requires_rewrite spellings"),
            ))
        }
        (Some(value), None) => (FieldSpelling::Underscore, Some(value)),
        (None, Some(value)) => (FieldSpelling::Space, Some(value)),
        (None, None) => (schema.spelling, None),
    };
    let requires_rewrite = decode_judgment(id, turn_num, stored)?;
    let enough_context = if schema.tracks_context {
        Some(decode_judgment(id, turn_num, raw.get(ENOUGH_CONTEXT_KEY))?)
    } else {
        None
    };

    let mut rewrite_candidates = IndexMap::new();
    let mut extra = Map::new();
    for (key, value) in raw {
        if is_requires_rewrite_key(key) || (schema.tracks_context && key == ENOUGH_CONTEXT_KEY) {
            continue;
        }
        match value.as_object().filter(|fields| is_candidate(fields)) {
            Some(fields) => {
                let candidate = decode_candidate(id, key, fields)?;
                rewrite_candidates.insert(CandidateKey::new(key.clone()), candidate);
            }
            None => {
                extra.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(Annotation {
        turn_num,
        requires_rewrite,
        spelling,
        enough_context,
        rewrite_candidates,
        extra,
    })
}

pub(crate) fn encode_annotation(annotation: &Annotation) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(
        annotation.spelling.requires_rewrite_key().to_owned(),
        annotation.requires_rewrite.to_wire(),
    );
    if let Some(context) = annotation.enough_context {
        fields.insert(ENOUGH_CONTEXT_KEY.to_owned(), context.to_wire());
    }
    for (key, candidate) in &annotation.rewrite_candidates {
        let mut candidate_fields = Map::new();
        candidate_fields.insert("text".to_owned(), Value::from(candidate.text.clone()));
        candidate_fields.insert("score".to_owned(), Value::from(candidate.score));
        candidate_fields.insert("optimal".to_owned(), Value::from(candidate.optimal));
        candidate_fields.extend(candidate.extra.clone());
        fields.insert(key.as_str().to_owned(), Value::Object(candidate_fields));
    }
    fields.extend(annotation.extra.clone());
    fields
}

fn decode_judgment(id: &str, turn_num: u32, value: Option<&Value>) -> Result<Judgment, SchemaError> {
    match value {
        None => Ok(Judgment::Unset),
        Some(value) => Judgment::from_wire(value).ok_or_else(|| {
            SchemaError::invalid(id, format!("turn {turn_num} has judgment {value} outside 0/1"))
        }),
    }
}

fn is_requires_rewrite_key(key: &str) -> bool {
    key == FieldSpelling::Underscore.requires_rewrite_key()
        || key == FieldSpelling::Space.requires_rewrite_key()
}

fn is_candidate(fields: &Map<String, Value>) -> bool {
    fields.contains_key("score") && fields.contains_key("optimal")
}

fn decode_candidate(
    id: &str,
    key: &str,
    fields: &Map<String, Value>,
) -> Result<RewriteCandidate, SchemaError> {
    let mut extra = fields.clone();
    let text = extra
        .remove("text")
        .and_then(|v| v.as_str().map(ToOwned::to_owned))
        .ok_or_else(|| SchemaError::invalid(id, format!("rewrite {key} has no text")))?;
    let score = extra
        .remove("score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| SchemaError::invalid(id, format!("rewrite {key} has a non-numeric score")))?;
    let optimal = match extra.remove("optimal") {
        Some(Value::Bool(flag)) => flag,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    };
    Ok(RewriteCandidate {
        text,
        score,
        optimal,
        extra,
    })
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> String {
    match fields.remove(key) {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
