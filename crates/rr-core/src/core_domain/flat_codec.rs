use serde_json::{Map, Value};

use super::schema::{
    assemble_dialog, decode_annotation, decode_turns, encode_annotation, encode_annotator,
    encode_turns, is_reserved_dialog_key, DIALOG_KEY,
};
use crate::core::{CorpusCodec, CorpusSchema, Dialog, Layout, SchemaError};

const ANNOTATIONS_KEY: &str = "annotations";

/// Dialogs carrying an `annotations` list aligned with `dialog[1..]`.
pub struct FlatAnnotationsCodec;

impl CorpusCodec for FlatAnnotationsCodec {
    fn layout(&self) -> Layout {
        Layout::FlatAnnotations
    }

    fn recognizes(&self, dialog: &Map<String, Value>) -> bool {
        dialog.get(ANNOTATIONS_KEY).is_some_and(Value::is_array)
    }

    fn raw_annotations<'a>(&self, dialog: &'a Map<String, Value>) -> Vec<&'a Map<String, Value>> {
        dialog
            .get(ANNOTATIONS_KEY)
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_object).collect())
            .unwrap_or_default()
    }

    fn decode_dialog(
        &self,
        id: &str,
        dialog: &Map<String, Value>,
        schema: CorpusSchema,
    ) -> Result<Dialog, SchemaError> {
        let turns = decode_turns(id, dialog)?;
        let raw_annotations = dialog
            .get(ANNOTATIONS_KEY)
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::invalid(id, "missing annotations list"))?;

        if raw_annotations.len() + 1 != turns.len() {
            return Err(SchemaError::AnnotationCountMismatch {
                dialog: id.to_owned(),
                annotations: raw_annotations.len(),
                turns: turns.len(),
            });
        }

        let annotations = raw_annotations
            .iter()
            .zip(turns.iter().skip(1))
            .enumerate()
            .map(|(index, (raw, judged))| {
                let fields = raw.as_object().ok_or_else(|| {
                    SchemaError::invalid(id, format!("annotation {index} is not an object"))
                })?;
                decode_annotation(id, judged.turn_num, fields, schema)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let extra = dialog
            .iter()
            .filter(|(key, _)| !is_reserved_dialog_key(key) && key.as_str() != ANNOTATIONS_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        assemble_dialog(id, dialog, turns, annotations, extra)
    }

    fn encode_dialog(&self, dialog: &Dialog) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(DIALOG_KEY.to_owned(), encode_turns(dialog.turns()));
        fields.insert(
            ANNOTATIONS_KEY.to_owned(),
            Value::Array(
                dialog
                    .annotations()
                    .iter()
                    .map(|annotation| Value::Object(encode_annotation(annotation)))
                    .collect(),
            ),
        );
        encode_annotator(&mut fields, dialog);
        fields.extend(dialog.extra().clone());
        fields
    }
}
