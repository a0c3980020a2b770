use std::fmt;

use serde_json::Value;

use crate::core::ValidationError;

// ---------------------------------------------------------------------------
// String-based identity newtypes
// ---------------------------------------------------------------------------

macro_rules! string_newtype {
    ($name:ident) => {
        #[derive(
            Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_newtype!(AnnotatorId);
string_newtype!(UnitId);
string_newtype!(DialogId);
string_newtype!(CandidateKey);

// ---------------------------------------------------------------------------
// UnitKey: identity of one annotator's copy of a unit of work
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnitKey {
    pub annotator: AnnotatorId,
    pub unit: UnitId,
}

impl UnitKey {
    pub fn new(annotator: AnnotatorId, unit: UnitId) -> Self {
        Self { annotator, unit }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.annotator, self.unit)
    }
}

// ---------------------------------------------------------------------------
// Judgment: tri-state reviewer decision
// ---------------------------------------------------------------------------

/// A reviewer's answer to a yes/no question about a turn.
///
/// Legacy documents encode "unset" as `null` or the sentinel `-1`; both decode
/// to [`Judgment::Unset`]. Encoding always produces `null`, `0` or `1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Judgment {
    #[default]
    Unset,
    False,
    True,
}

impl Judgment {
    pub fn is_set(self) -> bool {
        !matches!(self, Judgment::Unset)
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Judgment::Unset => None,
            Judgment::False => Some(false),
            Judgment::True => Some(true),
        }
    }

    /// Decodes a stored value. Returns `None` for values outside the domain.
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Judgment::Unset),
            Value::Bool(false) => Some(Judgment::False),
            Value::Bool(true) => Some(Judgment::True),
            Value::Number(n) => match n.as_i64() {
                Some(-1) => Some(Judgment::Unset),
                Some(0) => Some(Judgment::False),
                Some(1) => Some(Judgment::True),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_wire(self) -> Value {
        match self {
            Judgment::Unset => Value::Null,
            Judgment::False => Value::from(0),
            Judgment::True => Value::from(1),
        }
    }

    /// Parses reviewer input. Empty input clears the judgment.
    pub fn parse_input(raw: &str) -> Result<Self, ValidationError> {
        match raw.trim() {
            "" => Ok(Judgment::Unset),
            "0" => Ok(Judgment::False),
            "1" => Ok(Judgment::True),
            other => Err(ValidationError::OutOfDomain {
                value: other.to_owned(),
            }),
        }
    }
}

impl From<bool> for Judgment {
    fn from(value: bool) -> Self {
        if value {
            Judgment::True
        } else {
            Judgment::False
        }
    }
}

impl fmt::Display for Judgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Judgment::Unset => f.write_str("-"),
            Judgment::False => f.write_str("0"),
            Judgment::True => f.write_str("1"),
        }
    }
}

// ---------------------------------------------------------------------------
// JudgmentField: which judgment of an annotation is addressed
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JudgmentField {
    RequiresRewrite,
    EnoughContext,
}

impl JudgmentField {
    pub fn label(self) -> &'static str {
        match self {
            JudgmentField::RequiresRewrite => "Requires Rewrite",
            JudgmentField::EnoughContext => "Enough Context",
        }
    }
}

impl fmt::Display for JudgmentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Cursor: (dialog, turn) position inside a corpus
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Cursor {
    pub dialog_index: usize,
    pub turn_index: usize,
}

impl Cursor {
    pub fn new(dialog_index: usize, turn_index: usize) -> Self {
        Self {
            dialog_index,
            turn_index,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.dialog_index, self.turn_index)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_judgment_from_wire_accepts_legacy_sentinel() {
        assert_eq!(Judgment::from_wire(&json!(null)), Some(Judgment::Unset));
        assert_eq!(Judgment::from_wire(&json!(-1)), Some(Judgment::Unset));
        assert_eq!(Judgment::from_wire(&json!(0)), Some(Judgment::False));
        assert_eq!(Judgment::from_wire(&json!(1)), Some(Judgment::True));
        assert_eq!(Judgment::from_wire(&json!(true)), Some(Judgment::True));
        assert_eq!(Judgment::from_wire(&json!(2)), None);
        assert_eq!(Judgment::from_wire(&json!("1")), None);
    }

    #[test]
    fn test_judgment_to_wire() {
        assert_eq!(Judgment::Unset.to_wire(), json!(null));
        assert_eq!(Judgment::False.to_wire(), json!(0));
        assert_eq!(Judgment::True.to_wire(), json!(1));
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(Judgment::parse_input("0").unwrap(), Judgment::False);
        assert_eq!(Judgment::parse_input(" 1 ").unwrap(), Judgment::True);
        assert_eq!(Judgment::parse_input("").unwrap(), Judgment::Unset);

        let err = Judgment::parse_input("2").unwrap_err();
        assert_eq!(err.to_string(), "value 2 is not allowed, expected 0 or 1");
    }

    #[test]
    fn test_display_impls() {
        assert_eq!(AnnotatorId::new("dana").to_string(), "dana");
        assert_eq!(UnitId::new("batch_7").to_string(), "batch_7");
        assert_eq!(
            UnitKey::new(AnnotatorId::new("dana"), UnitId::new("batch_7")).to_string(),
            "dana/batch_7"
        );
        assert_eq!(Cursor::new(1, 2).to_string(), "(1, 2)");
        assert_eq!(Judgment::Unset.to_string(), "-");
    }
}
