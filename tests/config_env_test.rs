//! Config environment variable tests
//!
//! These tests verify that Config::from_env() correctly reads and applies
//! environment variable overrides. Config::from_env() also loads a .env file
//! via dotenvy, so these tests only assert on variables they set.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use mcp_concept_scaffolding::agents::{ScaffoldingType, SequencePolicyKind};
use mcp_concept_scaffolding::config::{Config, LogFormat};
use mcp_concept_scaffolding::AppError;
use serial_test::serial;
use std::env;

fn with_vars<F: FnOnce()>(vars: &[(&str, &str)], test: F) {
    for (key, value) in vars {
        env::set_var(key, value);
    }
    test();
    for (key, _) in vars {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_config_from_env_loads_successfully() {
    let result = Config::from_env();
    assert!(result.is_ok(), "Config::from_env() should succeed: {:?}", result.err());
}

#[test]
#[serial]
fn test_config_from_env_llm_settings() {
    with_vars(
        &[
            ("LLM_API_KEY", "sk-test"),
            ("LLM_BASE_URL", "https://custom.api.com/v1"),
            ("LLM_PRIMARY_MODEL", "model-a"),
            ("LLM_FALLBACK_MODEL", "model-b"),
            ("LLM_MAX_TOKENS", "256"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
            assert_eq!(config.llm.base_url, "https://custom.api.com/v1");
            assert_eq!(config.llm.primary_model, "model-a");
            assert_eq!(config.llm.fallback_model, "model-b");
            assert_eq!(config.llm.max_tokens, 256);
        },
    );
}

#[test]
#[serial]
fn test_config_blank_api_key_disables_backend() {
    with_vars(&[("LLM_API_KEY", "   ")], || {
        let config = Config::from_env().unwrap();
        assert!(config.llm.api_key.is_none());
    });
}

#[test]
#[serial]
fn test_config_from_env_custom_database() {
    with_vars(
        &[
            ("DATABASE_PATH", "/custom/path.db"),
            ("DATABASE_MAX_CONNECTIONS", "10"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.database.path.to_str().unwrap(), "/custom/path.db");
            assert_eq!(config.database.max_connections, 10);
        },
    );
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    with_vars(&[("LOG_FORMAT", "JSON")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
#[serial]
fn test_config_from_env_custom_request() {
    with_vars(
        &[
            ("REQUEST_TIMEOUT_MS", "60000"),
            ("MAX_RETRIES", "5"),
            ("RETRY_DELAY_MS", "2000"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.request.timeout_ms, 60000);
            assert_eq!(config.request.max_retries, 5);
            assert_eq!(config.request.retry_delay_ms, 2000);
        },
    );
}

#[test]
#[serial]
fn test_config_session_overrides() {
    with_vars(
        &[
            ("SEQUENCE_POLICY", "randomized"),
            ("SEQUENCE_SEED", "42"),
            ("MAX_EXCHANGES", "3"),
            ("ROUND_TIME_LIMIT_SECS", "0"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.session.sequence_policy, SequencePolicyKind::Randomized);
            assert_eq!(config.session.sequence_seed, Some(42));
            assert_eq!(config.session.max_exchanges, 3);
            assert_eq!(config.session.round_time_limit_secs, 0);
        },
    );
}

#[test]
#[serial]
fn test_config_fixed_sequence() {
    with_vars(&[("FIXED_SEQUENCE", "strategic,conceptual")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.session.fixed_sequence,
            vec![ScaffoldingType::Strategic, ScaffoldingType::Conceptual]
        );
    });
}

#[test]
#[serial]
fn test_config_rejects_repeated_sequence() {
    with_vars(&[("FIXED_SEQUENCE", "strategic,strategic")], || {
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
        assert!(err.to_string().contains("repeats"));
    });
}

#[test]
#[serial]
fn test_config_invalid_numbers_fall_back() {
    with_vars(
        &[
            ("MAX_EXCHANGES", "many"),
            ("ZPD_ALPHA", "1.7"),
            ("INTENSITY_MEDIUM_THRESHOLD", "9"),
            ("INTENSITY_LOW_THRESHOLD", "3"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.session.max_exchanges, 5);
            assert_eq!(config.zpd.alpha, 0.6);
            assert_eq!(config.zpd.medium_threshold, 4);
            assert_eq!(config.zpd.low_threshold, 8);
        },
    );
}

#[test]
#[serial]
fn test_config_zpd_overrides() {
    with_vars(
        &[
            ("ALLOW_LOW_INTENSITY", "true"),
            ("ZPD_ALPHA", "0.3"),
            ("ZPD_SCORE_CEILING", "0"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert!(config.zpd.allow_low_intensity);
            assert_eq!(config.zpd.alpha, 0.3);
            assert_eq!(config.zpd.score_ceiling, 1);
        },
    );
}

#[test]
#[serial]
fn test_config_expert_map_path() {
    with_vars(&[("EXPERT_MAP_PATH", "/data/reference.json")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.expert_map_path.unwrap().to_str().unwrap(),
            "/data/reference.json"
        );
    });
}
