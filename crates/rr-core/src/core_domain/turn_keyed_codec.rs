use serde_json::{Map, Value};

use super::schema::{
    assemble_dialog, decode_annotation, decode_turns, encode_annotation, encode_annotator,
    encode_turns, is_reserved_dialog_key, DIALOG_KEY,
};
use crate::core::{CorpusCodec, CorpusSchema, Dialog, Layout, SchemaError};

/// Dialogs with one object per judged turn, keyed by turn number ("1", "2", ...).
pub struct TurnKeyedCodec;

fn turn_key(key: &str) -> Option<u32> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

impl CorpusCodec for TurnKeyedCodec {
    fn layout(&self) -> Layout {
        Layout::TurnKeyed
    }

    fn recognizes(&self, dialog: &Map<String, Value>) -> bool {
        dialog
            .iter()
            .any(|(key, value)| turn_key(key).is_some() && value.is_object())
    }

    fn raw_annotations<'a>(&self, dialog: &'a Map<String, Value>) -> Vec<&'a Map<String, Value>> {
        dialog
            .iter()
            .filter(|(key, _)| turn_key(key).is_some())
            .filter_map(|(_, value)| value.as_object())
            .collect()
    }

    fn decode_dialog(
        &self,
        id: &str,
        dialog: &Map<String, Value>,
        schema: CorpusSchema,
    ) -> Result<Dialog, SchemaError> {
        let turns = decode_turns(id, dialog)?;

        let mut annotations = Vec::new();
        let mut extra = Map::new();
        for (key, value) in dialog {
            match (turn_key(key), value.as_object()) {
                (Some(turn_num), Some(fields)) => {
                    annotations.push(decode_annotation(id, turn_num, fields, schema)?);
                }
                _ if is_reserved_dialog_key(key) => {}
                _ => {
                    extra.insert(key.clone(), value.clone());
                }
            }
        }

        assemble_dialog(id, dialog, turns, annotations, extra)
    }

    fn encode_dialog(&self, dialog: &Dialog) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(DIALOG_KEY.to_owned(), encode_turns(dialog.turns()));
        for annotation in dialog.annotations() {
            fields.insert(
                annotation.turn_num.to_string(),
                Value::Object(encode_annotation(annotation)),
            );
        }
        encode_annotator(&mut fields, dialog);
        fields.extend(dialog.extra().clone());
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_key_accepts_only_digits() {
        assert_eq!(turn_key("12"), Some(12));
        assert_eq!(turn_key("0"), Some(0));
        assert_eq!(turn_key(""), None);
        assert_eq!(turn_key("-1"), None);
        assert_eq!(turn_key("1a"), None);
        assert_eq!(turn_key("dialog"), None);
    }
}
