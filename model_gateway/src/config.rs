//! Gateway configuration
//!
//! Every option is a `clap` flag with an environment-variable fallback. An
//! optional YAML file (`--config`) adds model-table overrides, the premium
//! model list and, for the memory account backend, seeded accounts.

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use data_connector::{
    AccountBackend, AccountStanding, CacheBackend, PostgresConfig, RedisConfig,
    StorageFactoryConfig,
};
use serde::{Deserialize, Serialize};

use crate::routers::models::Provider;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEFAULT_TTS_BASE_URL: &str = "https://texttospeech.googleapis.com";

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug, Clone)]
#[command(
    name = "assistant-gateway",
    about = "Streaming proxy that puts several generative-AI providers behind one assistant contract",
    disable_version_flag = true
)]
pub struct CliArgs {
    /// Print version and exit
    #[arg(short = 'V', long)]
    pub version: bool,

    /// Print version with build details and exit
    #[arg(long)]
    pub version_verbose: bool,

    /// Optional YAML file with model overrides, premium models and seeded accounts
    #[arg(long, env = "ASSISTANT_CONFIG")]
    pub config: Option<PathBuf>,

    // ── Server ───────────────────────────────────────────────────
    #[arg(long, env = "ASSISTANT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "ASSISTANT_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Upper bound on one inbound request, streaming included
    #[arg(long, env = "ASSISTANT_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,

    /// Maximum inbound body size in bytes (attachments arrive base64-encoded)
    #[arg(long, env = "ASSISTANT_MAX_PAYLOAD_SIZE", default_value_t = 64 * 1024 * 1024)]
    pub max_payload_size: usize,

    /// Allowed CORS origins; empty allows any origin
    #[arg(long, env = "ASSISTANT_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_allowed_origins: Vec<String>,

    // ── Logging / metrics ────────────────────────────────────────
    #[arg(long, env = "ASSISTANT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "ASSISTANT_LOG_JSON")]
    pub log_json: bool,

    /// Directory for daily-rolling log files; stdout only when unset
    #[arg(long, env = "ASSISTANT_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "ASSISTANT_PROMETHEUS_PORT")]
    pub prometheus_port: Option<u16>,

    // ── Providers ────────────────────────────────────────────────
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_GEMINI_BASE_URL)]
    pub gemini_base_url: String,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    pub openai_base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "DEEPSEEK_BASE_URL", default_value = DEFAULT_DEEPSEEK_BASE_URL)]
    pub deepseek_base_url: String,

    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub deepseek_api_key: Option<String>,

    #[arg(long, env = "TTS_BASE_URL", default_value = DEFAULT_TTS_BASE_URL)]
    pub tts_base_url: String,

    /// Falls back to the Gemini key when unset
    #[arg(long, env = "TTS_API_KEY", hide_env_values = true)]
    pub tts_api_key: Option<String>,

    // ── Models ───────────────────────────────────────────────────
    #[arg(long, env = "ASSISTANT_IMAGEN_MODEL", default_value = "imagen-3.0-generate-002")]
    pub imagen_model: String,

    #[arg(long, env = "ASSISTANT_OPENAI_IMAGE_MODEL", default_value = "dall-e-3")]
    pub openai_image_model: String,

    #[arg(
        long,
        env = "ASSISTANT_IMAGE_EDIT_MODEL",
        default_value = "gemini-2.0-flash-preview-image-generation"
    )]
    pub image_edit_model: String,

    #[arg(long, env = "ASSISTANT_TRANSLATION_MODEL", default_value = "gemini-2.0-flash")]
    pub translation_model: String,

    #[arg(long, env = "ASSISTANT_TTS_LANGUAGE", default_value = "en-US")]
    pub tts_language_code: String,

    #[arg(long, env = "ASSISTANT_TTS_VOICE")]
    pub tts_voice: Option<String>,

    /// Replay attachments of earlier turns to the native provider
    #[arg(long, env = "ASSISTANT_NATIVE_ATTACHMENT_REPLAY")]
    pub native_attachment_replay: bool,

    /// Drop the last history turn when it repeats the new message
    #[arg(
        long,
        env = "ASSISTANT_DEDUPE_TRAILING_USER_TURN",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub dedupe_trailing_user_turn: bool,

    #[arg(long, env = "ASSISTANT_MAX_EXTRACTED_CHARS", default_value_t = 200_000)]
    pub max_extracted_chars: usize,

    // ── Capability gate ──────────────────────────────────────────
    #[arg(long, env = "ADMIN_EMAIL")]
    pub admin_email: Option<String>,

    /// Model names that require a subscription or credits
    #[arg(long, env = "ASSISTANT_PREMIUM_MODELS", value_delimiter = ',')]
    pub premium_models: Vec<String>,

    /// Credits charged per generated image
    #[arg(long, env = "ASSISTANT_IMAGE_GENERATION_COST", default_value_t = 1)]
    pub image_generation_cost: i64,

    #[arg(long, env = "ASSISTANT_IMAGE_EDIT_COST", default_value_t = 1)]
    pub image_edit_cost: i64,

    #[arg(long, env = "ASSISTANT_FACE_SWAP_COST", default_value_t = 2)]
    pub face_swap_cost: i64,

    #[arg(long, env = "ASSISTANT_CAPABILITY_CACHE_TTL_SECS", default_value_t = 300)]
    pub capability_cache_ttl_secs: u64,

    #[arg(long, env = "ASSISTANT_ACTIVITY_LOG_LEN", default_value_t = 100)]
    pub activity_log_len: usize,

    // ── Face swap ────────────────────────────────────────────────
    #[arg(long, env = "FACESWAP_BASE_URL")]
    pub faceswap_base_url: Option<String>,

    #[arg(long, env = "FACESWAP_API_TOKEN", hide_env_values = true)]
    pub faceswap_api_token: Option<String>,

    #[arg(long, env = "FACESWAP_FN_INDEX", default_value_t = 0)]
    pub faceswap_fn_index: u32,

    #[arg(long, env = "FACESWAP_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub faceswap_poll_interval_ms: u64,

    #[arg(long, env = "FACESWAP_MAX_ATTEMPTS", default_value_t = 90)]
    pub faceswap_max_attempts: u32,

    // ── Storage ──────────────────────────────────────────────────
    #[arg(long, env = "ASSISTANT_ACCOUNT_BACKEND", value_parser = parse_account_backend, default_value = "memory")]
    pub account_backend: AccountBackend,

    #[arg(long, env = "ASSISTANT_CACHE_BACKEND", value_parser = parse_cache_backend, default_value = "memory")]
    pub cache_backend: CacheBackend,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub postgres_url: Option<String>,

    #[arg(long, env = "ASSISTANT_POSTGRES_POOL_MAX", default_value_t = 16)]
    pub postgres_pool_max: usize,

    #[arg(long, env = "ASSISTANT_ACCOUNTS_TABLE", default_value = "users")]
    pub accounts_table: String,

    #[arg(long, env = "REDIS_URL", hide_env_values = true)]
    pub redis_url: Option<String>,

    #[arg(long, env = "ASSISTANT_REDIS_POOL_MAX", default_value_t = 16)]
    pub redis_pool_max: usize,
}

fn parse_account_backend(value: &str) -> Result<AccountBackend, String> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Ok(AccountBackend::Memory),
        "postgres" => Ok(AccountBackend::Postgres),
        other => Err(format!("unknown account backend '{other}' (memory|postgres)")),
    }
}

fn parse_cache_backend(value: &str) -> Result<CacheBackend, String> {
    match value.to_ascii_lowercase().as_str() {
        "memory" => Ok(CacheBackend::Memory),
        "none" => Ok(CacheBackend::None),
        "redis" => Ok(CacheBackend::Redis),
        other => Err(format!("unknown cache backend '{other}' (memory|none|redis)")),
    }
}

// ============================================================================
// YAML file
// ============================================================================

/// Contents of the optional `--config` file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub models: Vec<ModelEntry>,
    pub premium_models: Vec<String>,
    pub accounts: Vec<AccountStanding>,
}

/// An explicit model-table entry; takes precedence over the prefix rules.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelEntry {
    pub name: String,
    pub provider: Provider,
    #[serde(default)]
    pub wire_name: Option<String>,
    #[serde(default)]
    pub supports_web_search: Option<bool>,
    #[serde(default)]
    pub supports_system_instruction: Option<bool>,
    #[serde(default)]
    pub supports_attachment_replay: Option<bool>,
    #[serde(default)]
    pub supports_thinking: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

// ============================================================================
// Resolved configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub prometheus_port: Option<u16>,
    pub providers: ProvidersConfig,
    pub models: ModelsConfig,
    pub history: HistoryOptions,
    pub attachments: ExtractionLimits,
    pub gate: GateConfig,
    pub faceswap: FaceSwapConfig,
    pub storage: StorageFactoryConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub max_payload_size: usize,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

#[derive(Clone)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

impl std::fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub gemini: ProviderEndpoint,
    pub openai: ProviderEndpoint,
    pub deepseek: ProviderEndpoint,
    pub tts: ProviderEndpoint,
}

impl ProvidersConfig {
    pub fn endpoint(&self, provider: Provider) -> &ProviderEndpoint {
        match provider {
            Provider::Gemini => &self.gemini,
            Provider::OpenAi => &self.openai,
            Provider::DeepSeek => &self.deepseek,
        }
    }

    /// Names of providers that have credentials.
    pub fn configured(&self) -> Vec<&'static str> {
        [
            ("gemini", &self.gemini),
            ("openai", &self.openai),
            ("deepseek", &self.deepseek),
            ("tts", &self.tts),
        ]
        .into_iter()
        .filter(|(_, endpoint)| endpoint.is_configured())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ModelsConfig {
    pub imagen_model: String,
    pub openai_image_model: String,
    pub image_edit_model: String,
    pub translation_model: String,
    pub tts_language_code: String,
    pub tts_voice: Option<String>,
    pub native_attachment_replay: bool,
    pub overrides: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryOptions {
    pub dedupe_trailing_user_turn: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractionLimits {
    pub max_chars_per_file: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionCosts {
    pub image_generation: i64,
    pub image_edit: i64,
    pub face_swap: i64,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub admin_email: Option<String>,
    pub premium_models: Vec<String>,
    pub costs: ActionCosts,
    pub cache_ttl: Duration,
    pub activity_log_len: usize,
}

#[derive(Clone)]
pub struct FaceSwapConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub fn_index: u32,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl std::fmt::Debug for FaceSwapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaceSwapConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("fn_index", &self.fn_index)
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                request_timeout: Duration::from_secs(300),
                max_payload_size: 64 * 1024 * 1024,
                cors_allowed_origins: Vec::new(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
                log_dir: None,
            },
            prometheus_port: None,
            providers: ProvidersConfig {
                gemini: ProviderEndpoint::new(DEFAULT_GEMINI_BASE_URL, None),
                openai: ProviderEndpoint::new(DEFAULT_OPENAI_BASE_URL, None),
                deepseek: ProviderEndpoint::new(DEFAULT_DEEPSEEK_BASE_URL, None),
                tts: ProviderEndpoint::new(DEFAULT_TTS_BASE_URL, None),
            },
            models: ModelsConfig {
                imagen_model: "imagen-3.0-generate-002".to_string(),
                openai_image_model: "dall-e-3".to_string(),
                image_edit_model: "gemini-2.0-flash-preview-image-generation".to_string(),
                translation_model: "gemini-2.0-flash".to_string(),
                tts_language_code: "en-US".to_string(),
                tts_voice: None,
                native_attachment_replay: false,
                overrides: Vec::new(),
            },
            history: HistoryOptions {
                dedupe_trailing_user_turn: true,
            },
            attachments: ExtractionLimits {
                max_chars_per_file: 200_000,
            },
            gate: GateConfig {
                admin_email: None,
                premium_models: Vec::new(),
                costs: ActionCosts {
                    image_generation: 1,
                    image_edit: 1,
                    face_swap: 2,
                },
                cache_ttl: Duration::from_secs(300),
                activity_log_len: 100,
            },
            faceswap: FaceSwapConfig {
                base_url: None,
                api_token: None,
                fn_index: 0,
                poll_interval: Duration::from_secs(1),
                max_attempts: 90,
            },
            storage: StorageFactoryConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Resolve CLI/env arguments plus the optional YAML file.
    pub fn from_args(args: CliArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let mut premium_models: Vec<String> = args
            .premium_models
            .iter()
            .chain(file.premium_models.iter())
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        premium_models.sort();
        premium_models.dedup();

        let tts_key = args.tts_api_key.or_else(|| args.gemini_api_key.clone());

        let storage = StorageFactoryConfig {
            account_backend: args.account_backend,
            cache_backend: args.cache_backend,
            postgres: args.postgres_url.map(|url| {
                let mut pg = PostgresConfig::new(url);
                pg.pool_max = args.postgres_pool_max;
                pg.table = args.accounts_table.clone();
                pg
            }),
            redis: args.redis_url.map(|url| {
                let mut redis = RedisConfig::new(url);
                redis.pool_max = args.redis_pool_max;
                redis
            }),
            seed_accounts: file.accounts,
        };

        let config = Self {
            server: ServerConfig {
                host: args.host,
                port: args.port,
                request_timeout: Duration::from_secs(args.request_timeout_secs),
                max_payload_size: args.max_payload_size,
                cors_allowed_origins: args.cors_allowed_origins,
            },
            logging: LoggingConfig {
                level: args.log_level,
                json: args.log_json,
                log_dir: args.log_dir,
            },
            prometheus_port: args.prometheus_port,
            providers: ProvidersConfig {
                gemini: ProviderEndpoint::new(args.gemini_base_url, args.gemini_api_key),
                openai: ProviderEndpoint::new(args.openai_base_url, args.openai_api_key),
                deepseek: ProviderEndpoint::new(args.deepseek_base_url, args.deepseek_api_key),
                tts: ProviderEndpoint::new(args.tts_base_url, tts_key),
            },
            models: ModelsConfig {
                imagen_model: args.imagen_model,
                openai_image_model: args.openai_image_model,
                image_edit_model: args.image_edit_model,
                translation_model: args.translation_model,
                tts_language_code: args.tts_language_code,
                tts_voice: args.tts_voice,
                native_attachment_replay: args.native_attachment_replay,
                overrides: file.models,
            },
            history: HistoryOptions {
                dedupe_trailing_user_turn: args.dedupe_trailing_user_turn,
            },
            attachments: ExtractionLimits {
                max_chars_per_file: args.max_extracted_chars,
            },
            gate: GateConfig {
                admin_email: args
                    .admin_email
                    .map(|e| e.trim().to_ascii_lowercase())
                    .filter(|e| !e.is_empty()),
                premium_models,
                costs: ActionCosts {
                    image_generation: args.image_generation_cost,
                    image_edit: args.image_edit_cost,
                    face_swap: args.face_swap_cost,
                },
                cache_ttl: Duration::from_secs(args.capability_cache_ttl_secs),
                activity_log_len: args.activity_log_len,
            },
            faceswap: FaceSwapConfig {
                base_url: args
                    .faceswap_base_url
                    .map(|u| u.trim_end_matches('/').to_string())
                    .filter(|u| !u.is_empty()),
                api_token: args.faceswap_api_token.filter(|t| !t.is_empty()),
                fn_index: args.faceswap_fn_index,
                poll_interval: Duration::from_millis(args.faceswap_poll_interval_ms),
                max_attempts: args.faceswap_max_attempts,
            },
            storage,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.faceswap.max_attempts == 0 {
            anyhow::bail!("faceswap max attempts must be greater than 0");
        }
        let costs = self.gate.costs;
        if costs.image_generation < 0 || costs.image_edit < 0 || costs.face_swap < 0 {
            anyhow::bail!("action costs must not be negative");
        }
        if let Some(url) = &self.faceswap.base_url {
            url::Url::parse(url).with_context(|| format!("invalid faceswap base url {url}"))?;
        }
        if let Some(pg) = &self.storage.postgres {
            pg.validate().map_err(anyhow::Error::msg)?;
        }
        if let Some(redis) = &self.storage.redis {
            redis.validate().map_err(anyhow::Error::msg)?;
        }
        Ok(())
    }
}
