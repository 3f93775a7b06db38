use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AoedeConfig {
    pub models: ModelsConfig,
    pub budget: BudgetConfig,
    pub bandit: BanditConfig,
    pub sleep: SleepConfig,
    pub filter: FilterConfig,
    pub storage: StorageConfig,
}

impl AoedeConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: AoedeConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file doesn't exist, return defaults with
    /// env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AOEDE_BASE_URL") {
            self.models.base_url = v;
        }
        if let Ok(v) = std::env::var("AOEDE_API_KEY") {
            self.models.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("AOEDE_DISPATCHER_MODEL") {
            self.models.dispatcher_model = v;
        }
        if let Ok(v) = std::env::var("AOEDE_EXECUTOR_MODEL") {
            self.models.executor_model = v;
        }
        if let Ok(v) = std::env::var("AOEDE_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Ok(v) = std::env::var("AOEDE_EXPORT_DIR") {
            self.storage.export_dir = v;
        }
        if let Ok(v) = std::env::var("AOEDE_BANDIT_EPSILON") {
            if let Ok(n) = v.parse() {
                self.bandit.epsilon = n;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// OpenAI-compatible endpoint root (the `/chat/completions` suffix is
    /// appended by the client).
    pub base_url: String,
    pub api_key: Option<String>,
    /// Fast, narrow model that routes and annotates.
    pub dispatcher_model: String,
    /// Slow, capable model that writes the reply.
    pub executor_model: String,
    pub dispatcher_timeout_secs: u64,
    pub executor_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    pub retrieval_timeout_secs: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            dispatcher_model: "qwen2.5:3b-instruct".to_string(),
            executor_model: "qwen2.5:14b-instruct".to_string(),
            dispatcher_timeout_secs: 15,
            executor_timeout_secs: 60,
            tool_timeout_secs: 10,
            retrieval_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Tokens reserved for instructions and formatting outside the packed
    /// sections.
    pub headroom_tokens: u32,
    /// Fraction of the usable budget offered to history before metadata and
    /// retrieval are considered.
    pub history_share: f32,
    pub history_floor_tokens: u32,
    pub history_ceiling_tokens: u32,
    /// Most recent messages kept even when their cost exceeds the cap.
    pub min_history_messages: usize,
    pub max_history_messages: usize,
    /// Tail of recent messages shown to the dispatcher.
    pub dispatch_window_messages: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            headroom_tokens: 128,
            history_share: 0.6,
            history_floor_tokens: 96,
            history_ceiling_tokens: 2048,
            min_history_messages: 4,
            max_history_messages: 40,
            dispatch_window_messages: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    /// Exploration probability for suggestion selection.
    pub epsilon: f64,
    /// Daily multiplicative shrink applied to every arm's wins and plays.
    pub decay_factor: f64,
    /// Assumed confidence for suggestions that don't carry one.
    pub default_confidence: f64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            decay_factor: 0.995,
            default_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SleepConfig {
    /// UTC hours bounding the automatic consolidation window.
    pub window_start_hour: u32,
    pub window_end_hour: u32,
    /// Minimum spacing between automatic runs.
    pub min_interval_hours: u32,
    /// Days a day-summary stays in the temp tier before promotion.
    pub temp_retention_days: i64,
    /// Length cap for one day summary, in estimated tokens.
    pub summary_max_tokens: usize,
    /// Byte cap for a promoted permanent-tier summary.
    pub long_day_max_chars: usize,
    pub allow_manual_trigger: bool,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            window_start_hour: 2,
            window_end_hour: 6,
            min_interval_hours: 20,
            temp_retention_days: 7,
            summary_max_tokens: 400,
            long_day_max_chars: 2000,
            allow_manual_trigger: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Extra profanity terms merged into the built-in list.
    pub extra_profanity: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Directory for regenerated training exports.
    pub export_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "aoede.db".to_string(),
            export_dir: "data".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
