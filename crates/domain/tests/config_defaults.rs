//! Pins the documented defaults so a stray serde attribute can't silently
//! change turn-taking behavior.

use vx_domain::config::Config;

#[test]
fn pipeline_defaults_match_documentation() {
    let config = Config::default();
    assert_eq!(config.pipeline.auto_interrupt_ms, 3000);
    assert_eq!(config.pipeline.min_user_speech_duration_ms, 500);
    assert_eq!(config.pipeline.end_of_utterance_ms, 700);
    assert_eq!(config.pipeline.first_audio_target_ms, 500);
    assert_eq!(config.pipeline.cancellation_latency_ms, 50);
    assert_eq!(config.pipeline.send_timeout_ms, 5000);
    assert!(!config.pipeline.kid_friendly_default);
}

#[test]
fn empty_toml_equals_defaults() {
    let parsed: Config = toml::from_str("").unwrap();
    assert_eq!(parsed.server.port, Config::default().server.port);
    assert_eq!(
        parsed.pipeline.auto_interrupt_ms,
        Config::default().pipeline.auto_interrupt_ms
    );
    assert_eq!(
        parsed.adapters.llm.default_model,
        Config::default().adapters.llm.default_model
    );
}

#[test]
fn partial_toml_overrides_only_named_fields() {
    let parsed: Config = toml::from_str(
        r#"
        [pipeline]
        auto_interrupt_ms = 2000

        [adapters.llm]
        default_model = "custom-model"
        "#,
    )
    .unwrap();
    assert_eq!(parsed.pipeline.auto_interrupt_ms, 2000);
    assert_eq!(parsed.pipeline.end_of_utterance_ms, 700);
    assert_eq!(parsed.adapters.llm.default_model, "custom-model");
    assert_eq!(parsed.adapters.llm.fallback_model, "swift-lite");
}

#[test]
fn history_defaults() {
    let config = Config::default();
    assert_eq!(config.history.persist_slo_ms, 50);
    assert_eq!(config.history.shutdown_drain_ms, 5000);
    assert_eq!(config.history.write_retries, 3);
}

#[test]
fn adapter_defaults_are_local_endpoints() {
    let config = Config::default();
    assert!(config.adapters.stt.base_url.starts_with("http://127.0.0.1"));
    assert!(config.adapters.llm.base_url.starts_with("http://127.0.0.1"));
    assert!(config.adapters.tts.base_url.starts_with("http://127.0.0.1"));
}
