use std::collections::HashMap;

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::core::{CandidateKey, Corpus, Cursor, RewriteCandidate};

// ---------------------------------------------------------------------------
// RewriteOptions: deduplicated, shuffled rewrite candidates of one turn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewriteOptions {
    /// One entry per distinct text, in presentation order.
    pub presentation_order: Vec<(CandidateKey, RewriteCandidate)>,
    /// Accepted key → keys whose text is identical to it. Every accepted key
    /// has an entry, possibly empty.
    pub duplicates: IndexMap<CandidateKey, Vec<CandidateKey>>,
}

impl RewriteOptions {
    pub fn is_empty(&self) -> bool {
        self.presentation_order.is_empty()
    }

    /// Accepted key that represents `key` in the presentation order.
    pub fn group_of(&self, key: &CandidateKey) -> Option<&CandidateKey> {
        if self.duplicates.contains_key(key) {
            return self.duplicates.get_key_value(key).map(|(accepted, _)| accepted);
        }
        self.duplicates
            .iter()
            .find(|(_, dups)| dups.contains(key))
            .map(|(accepted, _)| accepted)
    }

    /// Number of candidate keys recovered across groups and duplicates.
    pub fn key_count(&self) -> usize {
        self.presentation_order.len() + self.duplicates.values().map(Vec::len).sum::<usize>()
    }
}

/// Groups candidates with byte-identical text, keeping stored order.
pub fn group_candidates(candidates: &IndexMap<CandidateKey, RewriteCandidate>) -> RewriteOptions {
    let mut options = RewriteOptions::default();

    for (key, candidate) in candidates {
        let accepted = options
            .presentation_order
            .iter()
            .find(|(_, kept)| kept.text == candidate.text)
            .map(|(accepted_key, _)| accepted_key.clone());

        match accepted {
            Some(accepted_key) => {
                options
                    .duplicates
                    .entry(accepted_key)
                    .or_default()
                    .push(key.clone());
            }
            None => {
                options
                    .presentation_order
                    .push((key.clone(), candidate.clone()));
                options.duplicates.insert(key.clone(), Vec::new());
            }
        }
    }

    options
}

/// Groups candidates, then applies a uniform random permutation to the groups.
pub fn dedupe_candidates<R: Rng + ?Sized>(
    candidates: &IndexMap<CandidateKey, RewriteCandidate>,
    rng: &mut R,
) -> RewriteOptions {
    let mut options = group_candidates(candidates);
    options.presentation_order.shuffle(rng);
    options
}

// ---------------------------------------------------------------------------
// RewriteOptionIndex: options for every position of a loaded corpus
// ---------------------------------------------------------------------------

/// Built once per load, so the presentation order changes between loads but
/// stays stable while a unit is open.
#[derive(Debug, Clone, Default)]
pub struct RewriteOptionIndex {
    options: HashMap<Cursor, RewriteOptions>,
}

impl RewriteOptionIndex {
    pub fn build<R: Rng + ?Sized>(corpus: &Corpus, rng: &mut R) -> Self {
        let mut options = HashMap::new();
        for cursor in corpus.positions() {
            if let Some(annotation) = corpus.annotation_at(cursor) {
                if !annotation.rewrite_candidates.is_empty() {
                    options.insert(cursor, dedupe_candidates(&annotation.rewrite_candidates, rng));
                }
            }
        }
        Self { options }
    }

    pub fn get(&self, cursor: Cursor) -> Option<&RewriteOptions> {
        self.options.get(&cursor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::Map;

    use super::*;

    fn candidate(text: &str) -> RewriteCandidate {
        RewriteCandidate {
            text: text.to_owned(),
            score: 0.5,
            optimal: false,
            extra: Map::new(),
        }
    }

    fn candidates(entries: &[(&str, &str)]) -> IndexMap<CandidateKey, RewriteCandidate> {
        entries
            .iter()
            .map(|(key, text)| (CandidateKey::new(*key), candidate(text)))
            .collect()
    }

    #[test]
    fn test_identical_texts_collapse_into_first_key() {
        let input = candidates(&[("a", "same"), ("b", "same"), ("c", "diff")]);
        let mut rng = StdRng::seed_from_u64(7);

        let options = dedupe_candidates(&input, &mut rng);

        assert_eq!(options.presentation_order.len(), 2);
        assert_eq!(options.duplicates[&CandidateKey::new("a")], vec![CandidateKey::new("b")]);
        assert!(options.duplicates[&CandidateKey::new("c")].is_empty());
        assert_eq!(options.key_count(), 3);
    }

    #[test]
    fn test_every_key_appears_exactly_once() {
        let input = candidates(&[
            ("r1", "x"),
            ("r2", "y"),
            ("r3", "x"),
            ("r4", "z"),
            ("r5", "y"),
            ("r6", "x"),
        ]);
        let mut rng = StdRng::seed_from_u64(42);

        let options = dedupe_candidates(&input, &mut rng);

        let mut seen = HashSet::new();
        for (key, _) in &options.presentation_order {
            assert!(seen.insert(key.clone()));
        }
        for dups in options.duplicates.values() {
            for key in dups {
                assert!(seen.insert(key.clone()));
            }
        }
        assert_eq!(seen.len(), input.len());
        assert_eq!(
            options.group_of(&CandidateKey::new("r6")),
            Some(&CandidateKey::new("r1"))
        );
    }

    #[test]
    fn test_comparison_is_not_normalized() {
        let input = candidates(&[("a", "Same text"), ("b", "same text"), ("c", "Same text ")]);

        let options = group_candidates(&input);

        assert_eq!(options.presentation_order.len(), 3);
    }

    #[test]
    fn test_zero_candidates() {
        let mut rng = StdRng::seed_from_u64(1);
        let options = dedupe_candidates(&IndexMap::new(), &mut rng);

        assert!(options.is_empty());
        assert!(options.duplicates.is_empty());
    }

    #[test]
    fn test_shuffle_only_permutes_groups() {
        let input = candidates(&[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")]);
        let grouped = group_candidates(&input);

        let mut rng = StdRng::seed_from_u64(3);
        let shuffled = dedupe_candidates(&input, &mut rng);

        let mut before: Vec<_> = grouped.presentation_order.iter().map(|(k, _)| k.clone()).collect();
        let mut after: Vec<_> = shuffled.presentation_order.iter().map(|(k, _)| k.clone()).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
        assert_eq!(grouped.duplicates, shuffled.duplicates);
    }
}
