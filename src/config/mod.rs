use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub langbase: LangbaseConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub pipes: PipeConfig,
    pub chat: ChatConfig,
}

/// Langbase API configuration
#[derive(Debug, Clone)]
pub struct LangbaseConfig {
    pub api_key: String,
    pub base_url: String,
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

/// Langbase pipe names for the three oracle tasks.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    pub classify: String,
    pub score: String,
    pub compose: String,
    /// Per-state compose pipe overrides, keyed by lowercase state name.
    pub compose_overrides: HashMap<String, String>,
    /// Model used when pipes are created at startup.
    pub model: String,
}

/// Conversation and session behaviour
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub session_timeout_minutes: i64,
    pub history_window_hours: i64,
    pub phase_sequence: Vec<String>,
}

const COMPOSE_STATES: [&str; 7] = [
    "init",
    "normal",
    "drift",
    "ambiguous",
    "clarify",
    "skipped",
    "conclude",
];

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let langbase = LangbaseConfig {
            api_key: env::var("LANGBASE_API_KEY").map_err(|_| AppError::Config {
                message: "LANGBASE_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LANGBASE_BASE_URL")
                .unwrap_or_else(|_| "https://api.langbase.com".to_string()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/assessment.db".to_string()),
            ),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS").unwrap_or(5),
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

        let request = RequestConfig {
            timeout_ms: parse_var("REQUEST_TIMEOUT_MS").unwrap_or(30000),
            max_retries: parse_var("MAX_RETRIES").unwrap_or(3),
            retry_delay_ms: parse_var("RETRY_DELAY_MS").unwrap_or(1000),
        };

        let compose_overrides = COMPOSE_STATES
            .iter()
            .filter_map(|state| {
                env::var(format!("PIPE_COMPOSE_{}", state.to_uppercase()))
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (state.to_string(), v))
            })
            .collect();

        let pipes = PipeConfig {
            classify: env::var("PIPE_CLASSIFY")
                .unwrap_or_else(|_| "assessment-classify-v1".to_string()),
            score: env::var("PIPE_SCORE").unwrap_or_else(|_| "assessment-score-v1".to_string()),
            compose: env::var("PIPE_COMPOSE")
                .unwrap_or_else(|_| "assessment-compose-v1".to_string()),
            compose_overrides,
            model: env::var("PIPE_MODEL").unwrap_or_else(|_| "openai:gpt-4o".to_string()),
        };

        let session_timeout_minutes: i64 = parse_var("SESSION_TIMEOUT_MINUTES").unwrap_or(1440);
        if session_timeout_minutes <= 0 {
            return Err(AppError::Config {
                message: "SESSION_TIMEOUT_MINUTES must be positive".to_string(),
            });
        }

        let chat = ChatConfig {
            session_timeout_minutes,
            history_window_hours: parse_var("HISTORY_WINDOW_HOURS").unwrap_or(600),
            phase_sequence: env::var("PHASE_SEQUENCE")
                .map(|s| parse_sequence(&s))
                .unwrap_or_else(|_| ChatConfig::default().phase_sequence),
        };

        if chat.phase_sequence.is_empty() {
            return Err(AppError::Config {
                message: "PHASE_SEQUENCE must name at least one phase".to_string(),
            });
        }

        Ok(Config {
            langbase,
            database,
            logging,
            request,
            pipes,
            chat,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_sequence(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
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

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            classify: "assessment-classify-v1".to_string(),
            score: "assessment-score-v1".to_string(),
            compose: "assessment-compose-v1".to_string(),
            compose_overrides: HashMap::new(),
            model: "openai:gpt-4o".to_string(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 1440,
            history_window_hours: 600,
            phase_sequence: vec![
                "assessment.phq9".to_string(),
                "assessment.gad7".to_string(),
                "monitoring".to_string(),
            ],
        }
    }
}

impl PipeConfig {
    /// Pipe used to compose a reply in the given state (lowercase name).
    pub fn compose_pipe_for(&self, state: &str) -> &str {
        self.compose_overrides
            .get(state)
            .map(String::as_str)
            .unwrap_or(&self.compose)
    }
}
