use crate::core::{Corpus, Cursor, RangeError};

/// First position with an unset gated field, or the last position when the
/// corpus is fully annotated.
pub fn find_first_incomplete(corpus: &Corpus) -> Cursor {
    let mut last = Cursor::default();
    for cursor in corpus.positions() {
        if !corpus.is_complete(cursor) {
            return cursor;
        }
        last = cursor;
    }
    last
}

/// Dialogs with a single turn have no slots and are skipped by navigation.
fn next_populated(corpus: &Corpus, dialog_index: usize) -> Option<usize> {
    (dialog_index + 1..corpus.dialog_count()).find(|&index| corpus.annotation_count(index) > 0)
}

fn previous_populated(corpus: &Corpus, dialog_index: usize) -> Option<usize> {
    (0..dialog_index.min(corpus.dialog_count()))
        .rev()
        .find(|&index| corpus.annotation_count(index) > 0)
}

/// Every annotation of the dialog has a `requires_rewrite` value.
pub fn all_turns_filled(corpus: &Corpus, dialog_index: usize) -> bool {
    corpus.all_turns_filled(dialog_index)
}

// ---------------------------------------------------------------------------
// PositionTracker: the session cursor and its movement rules
// ---------------------------------------------------------------------------

/// Holds the cursor; every movement validates against a read-only corpus and
/// leaves the cursor untouched when the move is not possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionTracker {
    cursor: Cursor,
}

impl PositionTracker {
    pub fn resume(corpus: &Corpus) -> Self {
        Self {
            cursor: find_first_incomplete(corpus),
        }
    }

    pub fn at(corpus: &Corpus, cursor: Cursor) -> Result<Self, RangeError> {
        let mut tracker = Self::resume(corpus);
        tracker.jump_to(corpus, cursor)?;
        Ok(tracker)
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn can_advance_turn(&self, corpus: &Corpus) -> bool {
        self.cursor.turn_index + 1 < corpus.annotation_count(self.cursor.dialog_index)
    }

    pub fn can_advance_dialog(&self, corpus: &Corpus) -> bool {
        next_populated(corpus, self.cursor.dialog_index).is_some()
    }

    pub fn can_retreat(&self, corpus: &Corpus) -> bool {
        self.cursor.turn_index > 0 || previous_populated(corpus, self.cursor.dialog_index).is_some()
    }

    pub fn advance_turn(&mut self, corpus: &Corpus) -> bool {
        if !self.can_advance_turn(corpus) {
            return false;
        }
        self.cursor.turn_index += 1;
        true
    }

    /// Moves to the first turn of the next dialog that has any.
    pub fn advance_dialog(&mut self, corpus: &Corpus) -> bool {
        match next_populated(corpus, self.cursor.dialog_index) {
            Some(next) => {
                self.cursor = Cursor::new(next, 0);
                true
            }
            None => false,
        }
    }

    /// Steps back one turn; from turn 0 lands on the last turn of the
    /// previous dialog.
    pub fn retreat_turn(&mut self, corpus: &Corpus) -> bool {
        if self.cursor.turn_index > 0 {
            self.cursor.turn_index -= 1;
            return true;
        }
        self.retreat_dialog(corpus)
    }

    /// Moves to the last turn of the previous dialog that has any.
    pub fn retreat_dialog(&mut self, corpus: &Corpus) -> bool {
        match previous_populated(corpus, self.cursor.dialog_index) {
            Some(previous) => {
                self.cursor = Cursor::new(previous, corpus.annotation_count(previous) - 1);
                true
            }
            None => false,
        }
    }

    pub fn jump_to(&mut self, corpus: &Corpus, cursor: Cursor) -> Result<(), RangeError> {
        let Some((id, _)) = corpus.dialog_at(cursor.dialog_index) else {
            return Err(RangeError::DialogIndexOutOfRange {
                index: cursor.dialog_index,
                count: corpus.dialog_count(),
            });
        };
        let count = corpus.annotation_count(cursor.dialog_index);
        if cursor.turn_index >= count {
            return Err(RangeError::TurnOutOfRange {
                dialog: id.clone(),
                index: cursor.turn_index,
                count,
            });
        }
        self.cursor = cursor;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DialogId, Judgment, JudgmentField};
    use crate::core_domain::corpus::tests::corpus_with_slots;

    fn fill(corpus: &mut Corpus, dialog: &str, turn: usize) {
        corpus
            .set_judgment(
                &DialogId::new(dialog),
                turn,
                JudgmentField::RequiresRewrite,
                Judgment::False,
            )
            .unwrap();
    }

    #[test]
    fn test_find_first_incomplete_fresh_corpus() {
        let corpus = corpus_with_slots(&[2, 1], false);
        assert_eq!(find_first_incomplete(&corpus), Cursor::new(0, 0));
    }

    #[test]
    fn test_find_first_incomplete_skips_filled() {
        let mut corpus = corpus_with_slots(&[2, 2], false);
        fill(&mut corpus, "dlg-0", 0);
        fill(&mut corpus, "dlg-0", 1);
        fill(&mut corpus, "dlg-1", 0);

        assert_eq!(find_first_incomplete(&corpus), Cursor::new(1, 1));
    }

    #[test]
    fn test_find_first_incomplete_finds_interior_gap() {
        let mut corpus = corpus_with_slots(&[3], false);
        fill(&mut corpus, "dlg-0", 0);
        fill(&mut corpus, "dlg-0", 2);

        let cursor = find_first_incomplete(&corpus);
        assert_eq!(cursor, Cursor::new(0, 1));
        assert!(!corpus.annotation_at(cursor).unwrap().requires_rewrite.is_set());
    }

    #[test]
    fn test_find_first_incomplete_all_filled_returns_last() {
        let mut corpus = corpus_with_slots(&[1, 3], false);
        fill(&mut corpus, "dlg-0", 0);
        for turn in 0..3 {
            fill(&mut corpus, "dlg-1", turn);
        }

        assert_eq!(find_first_incomplete(&corpus), Cursor::new(1, 2));
    }

    #[test]
    fn test_find_first_incomplete_gates_on_context_when_tracked() {
        let mut corpus = corpus_with_slots(&[2], true);
        fill(&mut corpus, "dlg-0", 0);

        assert_eq!(find_first_incomplete(&corpus), Cursor::new(0, 0));
    }

    #[test]
    fn test_advance_bounds() {
        let corpus = corpus_with_slots(&[2, 1], false);
        let mut tracker = PositionTracker::resume(&corpus);

        assert!(tracker.can_advance_turn(&corpus));
        assert!(tracker.advance_turn(&corpus));
        assert!(!tracker.can_advance_turn(&corpus));
        assert!(!tracker.advance_turn(&corpus));
        assert_eq!(tracker.cursor(), Cursor::new(0, 1));

        assert!(tracker.advance_dialog(&corpus));
        assert_eq!(tracker.cursor(), Cursor::new(1, 0));
        assert!(!tracker.can_advance_dialog(&corpus));
        assert!(!tracker.advance_dialog(&corpus));
    }

    #[test]
    fn test_retreat_from_first_turn_lands_on_last_turn_of_previous_dialog() {
        let corpus = corpus_with_slots(&[3, 2], false);
        let mut tracker = PositionTracker::at(&corpus, Cursor::new(1, 0)).unwrap();

        assert!(tracker.retreat_turn(&corpus));
        assert_eq!(tracker.cursor(), Cursor::new(0, 2));
    }

    #[test]
    fn test_retreat_at_origin_is_noop() {
        let corpus = corpus_with_slots(&[2], false);
        let mut tracker = PositionTracker::resume(&corpus);

        assert!(!tracker.can_retreat(&corpus));
        assert!(!tracker.retreat_turn(&corpus));
        assert!(!tracker.retreat_dialog(&corpus));
        assert_eq!(tracker.cursor(), Cursor::new(0, 0));
    }

    #[test]
    fn test_retreat_dialog_lands_on_last_turn_of_previous_dialog() {
        let corpus = corpus_with_slots(&[3, 1], false);
        let mut tracker = PositionTracker::at(&corpus, Cursor::new(1, 0)).unwrap();

        assert!(tracker.retreat_dialog(&corpus));
        assert_eq!(tracker.cursor(), Cursor::new(0, 2));
        assert!(!tracker.retreat_dialog(&corpus));
        assert_eq!(tracker.cursor(), Cursor::new(0, 2));
    }

    #[test]
    fn test_navigation_skips_dialogs_without_slots() {
        let corpus = corpus_with_slots(&[0, 2, 0, 1, 0], false);

        let mut tracker = PositionTracker::resume(&corpus);
        assert_eq!(tracker.cursor(), Cursor::new(1, 0));
        assert!(!tracker.can_retreat(&corpus));
        assert!(!tracker.retreat_turn(&corpus));
        assert!(!tracker.retreat_dialog(&corpus));

        assert!(tracker.advance_dialog(&corpus));
        assert_eq!(tracker.cursor(), Cursor::new(3, 0));
        assert!(!tracker.can_advance_dialog(&corpus));
        assert!(!tracker.advance_dialog(&corpus));

        assert!(tracker.retreat_turn(&corpus));
        assert_eq!(tracker.cursor(), Cursor::new(1, 1));
        assert!(tracker.jump_to(&corpus, Cursor::new(2, 0)).is_err());
    }

    #[test]
    fn test_find_first_incomplete_skips_dialogs_without_slots() {
        let mut corpus = corpus_with_slots(&[0, 1, 0], false);
        assert_eq!(find_first_incomplete(&corpus), Cursor::new(1, 0));

        fill(&mut corpus, "dlg-1", 0);
        assert_eq!(find_first_incomplete(&corpus), Cursor::new(1, 0));
    }

    #[test]
    fn test_jump_out_of_range_keeps_cursor() {
        let corpus = corpus_with_slots(&[2], false);
        let mut tracker = PositionTracker::resume(&corpus);

        assert!(tracker.jump_to(&corpus, Cursor::new(0, 5)).is_err());
        assert!(tracker.jump_to(&corpus, Cursor::new(3, 0)).is_err());
        assert_eq!(tracker.cursor(), Cursor::new(0, 0));
    }

    #[test]
    fn test_all_turns_filled() {
        let mut corpus = corpus_with_slots(&[2], false);
        assert!(!all_turns_filled(&corpus, 0));
        fill(&mut corpus, "dlg-0", 0);
        assert!(!all_turns_filled(&corpus, 0));
        fill(&mut corpus, "dlg-0", 1);
        assert!(all_turns_filled(&corpus, 0));
        assert!(!all_turns_filled(&corpus, 9));
    }
}
