use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::agents::{ScaffoldingType, SequencePolicyKind};
use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub request: RequestConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub session: SessionConfig,
    pub zpd: ZpdConfig,
    /// JSON file with the reference map used as coverage target.
    pub expert_map_path: Option<PathBuf>,
}

/// Generative backend configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// No key means every forwarded turn falls back to templates.
    pub api_key: Option<String>,
    pub base_url: String,
    pub primary_model: String,
    pub fallback_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Round and sequencing rules for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sequence_policy: SequencePolicyKind,
    /// Order used by the fixed policy. Must contain each type once.
    pub fixed_sequence: Vec<ScaffoldingType>,
    /// Seeds the randomized policy; unseeded sessions draw from the thread rng.
    pub sequence_seed: Option<u64>,
    /// Learner turns after which a round closes on its own.
    pub max_exchanges: usize,
    /// Zero disables the round timer.
    pub round_time_limit_secs: u64,
    pub min_idea_length: usize,
    /// Turns treated as "early" when weighting open templates.
    pub early_turn_count: usize,
}

/// Intensity thresholds and smoothing parameters.
#[derive(Debug, Clone)]
pub struct ZpdConfig {
    pub medium_threshold: u8,
    pub low_threshold: u8,
    pub allow_low_intensity: bool,
    pub alpha: f64,
    pub score_ceiling: u8,
    pub node_growth_target: usize,
    pub edge_growth_target: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm_defaults = LlmConfig::default();
        let llm = LlmConfig {
            api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            base_url: env::var("LLM_BASE_URL").unwrap_or(llm_defaults.base_url),
            primary_model: env::var("LLM_PRIMARY_MODEL").unwrap_or(llm_defaults.primary_model),
            fallback_model: env::var("LLM_FALLBACK_MODEL")
                .unwrap_or(llm_defaults.fallback_model),
            max_tokens: env_or("LLM_MAX_TOKENS", llm_defaults.max_tokens),
            temperature: env_or("LLM_TEMPERATURE", llm_defaults.temperature),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/scaffolding.db".to_string()),
            ),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request_defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", request_defaults.timeout_ms),
            max_retries: env_or("MAX_RETRIES", request_defaults.max_retries),
            retry_delay_ms: env_or("RETRY_DELAY_MS", request_defaults.retry_delay_ms),
        };

        let session_defaults = SessionConfig::default();
        let fixed_sequence = match env::var("FIXED_SEQUENCE") {
            Ok(raw) => parse_sequence(&raw)?,
            Err(_) => session_defaults.fixed_sequence,
        };
        let session = SessionConfig {
            sequence_policy: env_or("SEQUENCE_POLICY", session_defaults.sequence_policy),
            fixed_sequence,
            sequence_seed: env::var("SEQUENCE_SEED").ok().and_then(|s| s.parse().ok()),
            max_exchanges: env_or("MAX_EXCHANGES", session_defaults.max_exchanges).max(1),
            round_time_limit_secs: env_or(
                "ROUND_TIME_LIMIT_SECS",
                session_defaults.round_time_limit_secs,
            ),
            min_idea_length: env_or("MIN_IDEA_LENGTH", session_defaults.min_idea_length),
            early_turn_count: env_or("EARLY_TURN_COUNT", session_defaults.early_turn_count),
        };

        let zpd_defaults = ZpdConfig::default();
        let mut zpd = ZpdConfig {
            medium_threshold: env_or("INTENSITY_MEDIUM_THRESHOLD", zpd_defaults.medium_threshold),
            low_threshold: env_or("INTENSITY_LOW_THRESHOLD", zpd_defaults.low_threshold),
            allow_low_intensity: env_or("ALLOW_LOW_INTENSITY", zpd_defaults.allow_low_intensity),
            alpha: env_or("ZPD_ALPHA", zpd_defaults.alpha),
            score_ceiling: env_or("ZPD_SCORE_CEILING", zpd_defaults.score_ceiling).max(1),
            node_growth_target: env_or("ZPD_NODE_GROWTH_TARGET", zpd_defaults.node_growth_target)
                .max(1),
            edge_growth_target: env_or("ZPD_EDGE_GROWTH_TARGET", zpd_defaults.edge_growth_target)
                .max(1),
        };
        if !(0.0..=1.0).contains(&zpd.alpha) {
            zpd.alpha = zpd_defaults.alpha;
        }
        if zpd.medium_threshold > zpd.low_threshold {
            zpd.medium_threshold = zpd_defaults.medium_threshold;
            zpd.low_threshold = zpd_defaults.low_threshold;
        }

        let expert_map_path = env::var("EXPERT_MAP_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(Config {
            llm,
            request,
            database,
            logging,
            session,
            zpd,
            expert_map_path,
        })
    }
}

/// Read and parse an environment variable, falling back on absence or parse failure.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a comma separated scaffolding order such as `conceptual,procedural`.
pub fn parse_sequence(raw: &str) -> Result<Vec<ScaffoldingType>, AppError> {
    let mut order = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let kind: ScaffoldingType = part
            .parse()
            .map_err(|message: String| AppError::Config { message })?;
        if !kind.is_scaffolding() {
            return Err(AppError::Config {
                message: format!("FIXED_SEQUENCE cannot include '{}'", kind),
            });
        }
        if order.contains(&kind) {
            return Err(AppError::Config {
                message: format!("FIXED_SEQUENCE repeats '{}'", kind),
            });
        }
        order.push(kind);
    }
    if order.is_empty() {
        return Err(AppError::Config {
            message: "FIXED_SEQUENCE must name at least one scaffolding type".to_string(),
        });
    }
    Ok(order)
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            primary_model: "gpt-4o".to_string(),
            fallback_model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sequence_policy: SequencePolicyKind::Fixed,
            fixed_sequence: ScaffoldingType::ALL.to_vec(),
            sequence_seed: None,
            max_exchanges: 5,
            round_time_limit_secs: 600,
            min_idea_length: 20,
            early_turn_count: 2,
        }
    }
}

impl Default for ZpdConfig {
    fn default() -> Self {
        Self {
            medium_threshold: 4,
            low_threshold: 8,
            allow_low_intensity: false,
            alpha: 0.6,
            score_ceiling: 10,
            node_growth_target: 4,
            edge_growth_target: 6,
        }
    }
}
