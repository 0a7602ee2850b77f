//! Content policy: optional transformation of text entering and leaving
//! the LLM, keyed on session flags.
//!
//! The policy is stateless across turns; the outbound side hands out a
//! per-turn [`OutFilter`] that may hold back a small tail so a disallowed
//! term split across stream chunks never reaches the wire.

use regex::Regex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyFlags {
    pub kid_friendly: bool,
}

/// Outcome of filtering the user's transcribed text.
#[derive(Debug, Clone)]
pub struct FilterDecision {
    pub allowed: bool,
    /// The text safe to surface in events (masked when not allowed).
    pub text: String,
    pub reason: Option<String>,
}

/// Streaming filter over the LLM's reply for one turn.
pub trait OutFilter: Send {
    /// Filter one chunk; may return less text than it received (the
    /// remainder is held back until more context arrives).
    fn filter_chunk(&mut self, chunk: &str) -> String;
    /// Release whatever is still held back, filtered.
    fn flush(&mut self) -> String;
}

pub trait ContentPolicy: Send + Sync {
    fn filter_in(&self, text: &str, flags: PolicyFlags) -> FilterDecision;
    fn out_filter(&self, flags: PolicyFlags) -> Box<dyn OutFilter>;
    /// The canonical reply substituted when `filter_in` rejects.
    fn redirect_reply(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kid-friendly implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MASK: &str = "***";

const REDIRECT_REPLY: &str =
    "Let's talk about something else! What's your favorite animal, or a place you'd love to visit?";

const DISALLOWED_TERMS: &[&str] = &[
    "gun", "guns", "knife", "knives", "weapon", "weapons", "kill", "killing",
    "murder", "blood", "violence", "drugs", "alcohol", "beer", "vodka",
    "cigarette", "cigarettes", "gambling", "casino",
];

/// The default policy: passthrough for regular sessions, term masking and
/// topic redirects when the session runs kid-friendly.
pub struct KidFriendlyPolicy {
    blocklist: Regex,
    /// Longest term in chars; the out-filter holds back this much tail.
    hold_back: usize,
}

impl KidFriendlyPolicy {
    pub fn new() -> Self {
        // Compiled once at startup, same as any other pattern set.
        let pattern = format!(r"(?i)\b({})\b", DISALLOWED_TERMS.join("|"));
        let blocklist = Regex::new(&pattern).expect("static blocklist pattern is valid");
        let hold_back = DISALLOWED_TERMS
            .iter()
            .map(|t| t.chars().count())
            .max()
            .unwrap_or(0);
        Self {
            blocklist,
            hold_back,
        }
    }

    fn mask(&self, text: &str) -> String {
        self.blocklist.replace_all(text, MASK).into_owned()
    }
}

impl Default for KidFriendlyPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentPolicy for KidFriendlyPolicy {
    fn filter_in(&self, text: &str, flags: PolicyFlags) -> FilterDecision {
        if !flags.kid_friendly || !self.blocklist.is_match(text) {
            return FilterDecision {
                allowed: true,
                text: text.to_owned(),
                reason: None,
            };
        }
        FilterDecision {
            allowed: false,
            text: self.mask(text),
            reason: Some("disallowed topic for kid-friendly session".into()),
        }
    }

    fn out_filter(&self, flags: PolicyFlags) -> Box<dyn OutFilter> {
        if !flags.kid_friendly {
            return Box::new(Passthrough);
        }
        Box::new(MaskingFilter {
            blocklist: self.blocklist.clone(),
            hold_back: self.hold_back,
            pending: String::new(),
        })
    }

    fn redirect_reply(&self) -> &str {
        REDIRECT_REPLY
    }
}

// ── Passthrough ─────────────────────────────────────────────────────

struct Passthrough;

impl OutFilter for Passthrough {
    fn filter_chunk(&mut self, chunk: &str) -> String {
        chunk.to_owned()
    }
    fn flush(&mut self) -> String {
        String::new()
    }
}

// ── Masking stream filter ───────────────────────────────────────────

/// Masks disallowed terms across chunk boundaries. The pending buffer is
/// kept in already-masked form; only the last `hold_back` chars stay
/// unreleased, which is enough to cover any term still being assembled.
struct MaskingFilter {
    blocklist: Regex,
    hold_back: usize,
    pending: String,
}

impl OutFilter for MaskingFilter {
    fn filter_chunk(&mut self, chunk: &str) -> String {
        self.pending.push_str(chunk);
        let masked = self
            .blocklist
            .replace_all(&self.pending, MASK)
            .into_owned();
        self.pending = masked;

        let chars: Vec<char> = self.pending.chars().collect();
        if chars.len() <= self.hold_back {
            return String::new();
        }
        let release: String = chars[..chars.len() - self.hold_back].iter().collect();
        self.pending = chars[chars.len() - self.hold_back..].iter().collect();
        release
    }

    fn flush(&mut self) -> String {
        let masked = self
            .blocklist
            .replace_all(&self.pending, MASK)
            .into_owned();
        self.pending.clear();
        masked
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const KID: PolicyFlags = PolicyFlags { kid_friendly: true };
    const ADULT: PolicyFlags = PolicyFlags {
        kid_friendly: false,
    };

    #[test]
    fn regular_session_passes_everything() {
        let policy = KidFriendlyPolicy::new();
        let decision = policy.filter_in("tell me about guns", ADULT);
        assert!(decision.allowed);
        assert_eq!(decision.text, "tell me about guns");
    }

    #[test]
    fn kid_session_rejects_and_masks() {
        let policy = KidFriendlyPolicy::new();
        let decision = policy.filter_in("tell me about guns", KID);
        assert!(!decision.allowed);
        assert_eq!(decision.text, "tell me about ***");
        assert!(decision.reason.is_some());
    }

    #[test]
    fn matching_is_word_bounded() {
        let policy = KidFriendlyPolicy::new();
        // "begun" contains "gun" but is not a hit.
        assert!(policy.filter_in("we have begun", KID).allowed);
    }

    #[test]
    fn out_filter_masks_within_a_chunk() {
        let policy = KidFriendlyPolicy::new();
        let mut filter = policy.out_filter(KID);
        let mut out = filter.filter_chunk("there was a knife on the long wooden table");
        out.push_str(&filter.flush());
        assert_eq!(out, "there was a *** on the long wooden table");
    }

    #[test]
    fn out_filter_masks_terms_split_across_chunks() {
        let policy = KidFriendlyPolicy::new();
        let mut filter = policy.out_filter(KID);
        let mut out = String::new();
        out.push_str(&filter.filter_chunk("careful with that kni"));
        out.push_str(&filter.filter_chunk("fe over there, please"));
        out.push_str(&filter.flush());
        assert_eq!(out, "careful with that *** over there, please");
        assert!(!out.contains("knife"));
    }

    #[test]
    fn passthrough_emits_immediately() {
        let policy = KidFriendlyPolicy::new();
        let mut filter = policy.out_filter(ADULT);
        assert_eq!(filter.filter_chunk("any text"), "any text");
        assert_eq!(filter.flush(), "");
    }

    #[test]
    fn flush_releases_held_tail() {
        let policy = KidFriendlyPolicy::new();
        let mut filter = policy.out_filter(KID);
        let released = filter.filter_chunk("hi");
        assert_eq!(released, "");
        assert_eq!(filter.flush(), "hi");
    }

    #[test]
    fn redirect_reply_is_clean() {
        let policy = KidFriendlyPolicy::new();
        let decision = policy.filter_in(policy.redirect_reply(), KID);
        assert!(decision.allowed);
    }
}
