//! In-memory reverse index for full-text turn search.
//!
//! Maps lowercase words to turn IDs with match counts. Built at startup
//! from the persisted turns and kept live as new turns are appended.

use std::collections::HashMap;

use parking_lot::RwLock;

use vx_domain::call::Turn;

/// In-memory reverse index: word -> { turn_id -> count }.
pub struct TurnIndex {
    index: RwLock<HashMap<String, HashMap<String, usize>>>,
}

const MAX_RESULTS: usize = 50;

impl TurnIndex {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Index both sides of a turn's text under its turn_id.
    pub fn index_turn(&self, turn: &Turn) {
        let mut index = self.index.write();
        for word in words(&turn.user_text).chain(words(&turn.ai_text)) {
            *index
                .entry(word)
                .or_default()
                .entry(turn.turn_id.clone())
                .or_insert(0) += 1;
        }
    }

    /// Drop a turn from the index (used by pruning).
    pub fn forget_turn(&self, turn_id: &str) {
        let mut index = self.index.write();
        index.retain(|_, turns| {
            turns.remove(turn_id);
            !turns.is_empty()
        });
    }

    /// Match turn IDs against a whitespace-separated query, ranked by
    /// total match count. Multi-word queries require every word to hit.
    pub fn search(&self, query: &str) -> Vec<(String, usize)> {
        let terms: Vec<String> = words(query).collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let index = self.index.read();
        let mut scores: HashMap<String, (usize, usize)> = HashMap::new(); // id -> (terms hit, count)
        for term in &terms {
            if let Some(turns) = index.get(term) {
                for (turn_id, count) in turns {
                    let entry = scores.entry(turn_id.clone()).or_insert((0, 0));
                    entry.0 += 1;
                    entry.1 += count;
                }
            }
        }

        let mut hits: Vec<(String, usize)> = scores
            .into_iter()
            .filter(|(_, (terms_hit, _))| *terms_hit == terms.len())
            .map(|(id, (_, count))| (id, count))
            .collect();
        hits.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(MAX_RESULTS);
        hits
    }
}

impl Default for TurnIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: &str, user: &str, ai: &str) -> Turn {
        let mut t = Turn::new("s1", "u1");
        t.turn_id = id.into();
        t.user_text = user.into();
        t.ai_text = ai.into();
        t
    }

    #[test]
    fn finds_words_from_both_sides() {
        let index = TurnIndex::new();
        index.index_turn(&turn("t1", "tell me about whales", "whales are mammals"));

        let hits = index.search("whales");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "t1");
        assert_eq!(hits[0].1, 2);
    }

    #[test]
    fn multi_word_query_requires_all_terms() {
        let index = TurnIndex::new();
        index.index_turn(&turn("t1", "the red boat", "a boat indeed"));
        index.index_turn(&turn("t2", "the red car", "a car indeed"));

        let hits = index.search("red boat");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "t1");
    }

    #[test]
    fn search_is_case_insensitive() {
        let index = TurnIndex::new();
        index.index_turn(&turn("t1", "Hello World", ""));
        assert_eq!(index.search("hello").len(), 1);
        assert_eq!(index.search("WORLD").len(), 1);
    }

    #[test]
    fn forget_removes_turn() {
        let index = TurnIndex::new();
        index.index_turn(&turn("t1", "hello there", ""));
        index.forget_turn("t1");
        assert!(index.search("hello").is_empty());
    }

    #[test]
    fn empty_query_matches_nothing() {
        let index = TurnIndex::new();
        index.index_turn(&turn("t1", "hello", ""));
        assert!(index.search("").is_empty());
        assert!(index.search("  ").is_empty());
    }
}
