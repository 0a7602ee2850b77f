//! Per-turn model routing.
//!
//! Pure, synchronous decision logic: given the turn's context, pick the
//! model, token budget, and deadline. Deterministic for identical input;
//! no HTTP, no clocks.

use vx_domain::call::{ModelChoice, ModelReason};
use vx_domain::config::LlmConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the router looks at for one turn.
#[derive(Debug, Clone)]
pub struct RouteContext<'a> {
    pub language: &'a str,
    pub kid_friendly: bool,
    pub prompt: &'a str,
    /// Client-requested model; bypasses routing when present.
    pub model_hint: Option<&'a str>,
    /// Latency of the session's most recent LLM call, if any.
    pub recent_llm_ms: Option<u64>,
    pub active_sessions: usize,
    pub max_sessions: usize,
}

/// The decision function that picks which LLM serves a turn.
pub struct ModelRouter {
    default_model: String,
    fallback_model: String,
    complex_model: String,
    complexity_threshold: f64,
    max_tokens: u32,
    timeout_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ModelRouter {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            default_model: cfg.default_model.clone(),
            fallback_model: cfg.fallback_model.clone(),
            complex_model: cfg.complex_model.clone(),
            complexity_threshold: cfg.complexity_threshold,
            max_tokens: cfg.max_tokens,
            timeout_ms: cfg.timeout_ms,
        }
    }

    /// Resolution order: explicit hint > complexity escalation > default.
    ///
    /// Escalation requires the heuristic to clear the threshold AND the
    /// load budget to allow it (under 80% of session capacity, and the
    /// session's recent LLM latency not already degraded). Kid-friendly
    /// sessions never escalate; short simple replies are the point.
    pub fn choose(&self, ctx: &RouteContext) -> ModelChoice {
        if let Some(hint) = ctx.model_hint {
            return ModelChoice {
                model_id: hint.to_owned(),
                reason: ModelReason::Default,
                max_tokens: self.max_tokens,
                timeout_ms: self.timeout_ms,
            };
        }

        let score = complexity(ctx.prompt);
        let load_allows = ctx.max_sessions == 0
            || ctx.active_sessions * 10 < ctx.max_sessions * 8;
        let latency_ok = ctx.recent_llm_ms.map_or(true, |ms| ms < self.timeout_ms / 2);

        if !ctx.kid_friendly && score >= self.complexity_threshold && load_allows && latency_ok {
            return ModelChoice {
                model_id: self.complex_model.clone(),
                reason: ModelReason::ComplexQuery,
                max_tokens: self.max_tokens.saturating_mul(2),
                timeout_ms: self.timeout_ms,
            };
        }

        ModelChoice {
            model_id: self.default_model.clone(),
            reason: ModelReason::Default,
            max_tokens: self.max_tokens,
            timeout_ms: self.timeout_ms,
        }
    }

    /// The retry path after a failed call: the next-cheaper model with a
    /// tighter budget. Falling back from the fallback stays on it; the
    /// turn loop bounds the retry count, not the router.
    pub fn fallback(&self, _prior: &ModelChoice) -> ModelChoice {
        ModelChoice {
            model_id: self.fallback_model.clone(),
            reason: ModelReason::Fallback,
            max_tokens: self.max_tokens,
            timeout_ms: self.timeout_ms / 2,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Complexity heuristic
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const REASONING_CUES: &[&str] = &[
    "why", "how", "explain", "compare", "difference", "plan", "analyze",
    "summarize", "pros", "cons", "steps",
];

/// Score a prompt 0.0–1.0. Length and reasoning cues each contribute half;
/// a 40-word prompt full of "why/how/explain" saturates the score.
fn complexity(prompt: &str) -> f64 {
    let words: Vec<&str> = prompt.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }

    let length_score = (words.len() as f64 / 40.0).min(1.0);
    let cue_hits = words
        .iter()
        .filter(|w| {
            let w = w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            REASONING_CUES.contains(&w.as_str())
        })
        .count();
    let cue_score = (cue_hits as f64 / 2.0).min(1.0);

    (length_score + cue_score) / 2.0
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ModelRouter {
        ModelRouter::from_config(&LlmConfig::default())
    }

    fn ctx<'a>(prompt: &'a str) -> RouteContext<'a> {
        RouteContext {
            language: "en",
            kid_friendly: false,
            prompt,
            model_hint: None,
            recent_llm_ms: None,
            active_sessions: 0,
            max_sessions: 256,
        }
    }

    #[test]
    fn short_prompt_gets_default_model() {
        let choice = router().choose(&ctx("Hello"));
        assert_eq!(choice.model_id, "swift-mini");
        assert_eq!(choice.reason, ModelReason::Default);
    }

    #[test]
    fn explicit_hint_bypasses_routing() {
        let mut c = ctx("why why why explain compare the difference in detail");
        c.model_hint = Some("pinned-model");
        let choice = router().choose(&c);
        assert_eq!(choice.model_id, "pinned-model");
    }

    #[test]
    fn complex_prompt_escalates() {
        let prompt = "Can you explain why the plan failed, compare the \
                      difference between the two approaches, and analyze \
                      the pros and cons of each with concrete steps";
        let choice = router().choose(&ctx(prompt));
        assert_eq!(choice.reason, ModelReason::ComplexQuery);
        assert_eq!(choice.model_id, "sage-large");
    }

    #[test]
    fn kid_friendly_never_escalates() {
        let prompt = "Can you explain why the plan failed, compare the \
                      difference between the two approaches, and analyze \
                      the pros and cons of each with concrete steps";
        let mut c = ctx(prompt);
        c.kid_friendly = true;
        assert_eq!(router().choose(&c).reason, ModelReason::Default);
    }

    #[test]
    fn high_load_blocks_escalation() {
        let prompt = "Can you explain why the plan failed, compare the \
                      difference between the two approaches, and analyze \
                      the pros and cons of each with concrete steps";
        let mut c = ctx(prompt);
        c.active_sessions = 250;
        assert_eq!(router().choose(&c).reason, ModelReason::Default);
    }

    #[test]
    fn choice_is_deterministic() {
        let a = router().choose(&ctx("tell me a story about boats"));
        let b = router().choose(&ctx("tell me a story about boats"));
        assert_eq!(a.model_id, b.model_id);
        assert_eq!(a.reason, b.reason);
        assert_eq!(a.max_tokens, b.max_tokens);
    }

    #[test]
    fn fallback_is_the_cheaper_model_with_tighter_deadline() {
        let r = router();
        let prior = r.choose(&ctx("Hello"));
        let fb = r.fallback(&prior);
        assert_eq!(fb.model_id, "swift-lite");
        assert_eq!(fb.reason, ModelReason::Fallback);
        assert!(fb.timeout_ms < prior.timeout_ms);
    }

    #[test]
    fn empty_prompt_scores_zero() {
        assert_eq!(complexity(""), 0.0);
        assert_eq!(complexity("   "), 0.0);
    }
}
