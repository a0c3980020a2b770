use crate::core::{Cursor, DialogId, JudgmentField, UnitKey};

// ---------------------------------------------------------------------------
// Sub-error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeError {
    #[error("dialog {dialog} not found")]
    DialogNotFound { dialog: DialogId },
    #[error("dialog index {index} out of range ({count} dialogs)")]
    DialogIndexOutOfRange { index: usize, count: usize },
    #[error("turn index {index} out of range for dialog {dialog} ({count} annotations)")]
    TurnOutOfRange {
        dialog: DialogId,
        index: usize,
        count: usize,
    },
    #[error("field {field} is not tracked by this corpus")]
    FieldNotTracked { field: JudgmentField },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("value {value} is not allowed, expected 0 or 1")]
    OutOfDomain { value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("corpus document must be a JSON object of dialogs")]
    NotAnObject,
    #[error("corpus has no annotation slots")]
    Empty,
    #[error("could not detect corpus schema: {0}")]
    Undetected(String),
    #[error("dialog {dialog}: {reason}")]
    InvalidDialog { dialog: String, reason: String },
    #[error("dialog {dialog} has {annotations} annotations for {turns} turns")]
    AnnotationCountMismatch {
        dialog: String,
        annotations: usize,
        turns: usize,
    },
    #[error("invalid corpus JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchemaError {
    pub(crate) fn invalid(dialog: &str, reason: impl Into<String>) -> Self {
        SchemaError::InvalidDialog {
            dialog: dialog.to_owned(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// IntegrityWarning: soft failure from post-save verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// The authoritative record could not be read.
    Unreadable(String),
    /// No authoritative record exists yet.
    Missing,
    /// The stored annotator name differs from the session's.
    AnnotatorMismatch,
    /// Stored judgments differ at these positions.
    Mismatch(Vec<Cursor>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("saved copy of {key} does not match the session: {}", describe(.issue))]
pub struct IntegrityWarning {
    pub key: UnitKey,
    pub issue: IntegrityIssue,
}

fn describe(issue: &IntegrityIssue) -> String {
    match issue {
        IntegrityIssue::Unreadable(reason) => format!("store unreadable ({reason})"),
        IntegrityIssue::Missing => "no saved copy found".to_owned(),
        IntegrityIssue::AnnotatorMismatch => "annotator name differs".to_owned(),
        IntegrityIssue::Mismatch(positions) => {
            let listed = positions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("judgments differ at {listed}")
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AnnotatorId, UnitId};

    #[test]
    fn test_display_range_turn_out_of_range() {
        let err = RangeError::TurnOutOfRange {
            dialog: DialogId::new("dlg-1"),
            index: 4,
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "turn index 4 out of range for dialog dlg-1 (2 annotations)"
        );
    }

    #[test]
    fn test_display_range_field_not_tracked() {
        let err = RangeError::FieldNotTracked {
            field: JudgmentField::EnoughContext,
        };
        assert_eq!(
            err.to_string(),
            "field Enough Context is not tracked by this corpus"
        );
    }

    #[test]
    fn test_display_schema_count_mismatch() {
        let err = SchemaError::AnnotationCountMismatch {
            dialog: "dlg-9".into(),
            annotations: 3,
            turns: 3,
        };
        assert_eq!(err.to_string(), "dialog dlg-9 has 3 annotations for 3 turns");
    }

    #[test]
    fn test_display_integrity_mismatch() {
        let warning = IntegrityWarning {
            key: UnitKey::new(AnnotatorId::new("dana"), UnitId::new("b1")),
            issue: IntegrityIssue::Mismatch(vec![Cursor::new(0, 1), Cursor::new(2, 0)]),
        };
        assert_eq!(
            warning.to_string(),
            "saved copy of dana/b1 does not match the session: judgments differ at (0, 1), (2, 0)"
        );
    }

    #[test]
    fn test_display_integrity_unreadable() {
        let warning = IntegrityWarning {
            key: UnitKey::new(AnnotatorId::new("dana"), UnitId::new("b1")),
            issue: IntegrityIssue::Unreadable("database locked".into()),
        };
        assert!(warning.to_string().ends_with("store unreadable (database locked)"));
    }
}
