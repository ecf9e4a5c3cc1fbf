use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::SearchError;
use crate::types::StrategyKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub environment: Environment,
    pub log_level: String,
    pub query: QueryConfig,
    pub fusion: FusionWeights,
    pub recommendation: PenaltyConfig,
    pub geo: GeoConfig,
    pub timeouts: TimeoutConfig,
    pub assembler: AssemblerConfig,
    pub index: IndexConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
}

/// Weight applied to each strategy's normalized score during fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
    pub geo: f64,
    /// Fused results scoring below this are dropped. 0.0 keeps everything.
    pub min_fused_score: f64,
}

impl FusionWeights {
    pub fn weight(&self, kind: StrategyKind) -> f64 {
        match kind {
            StrategyKind::Lexical => self.lexical,
            StrategyKind::Vector => self.vector,
            StrategyKind::Geo => self.geo,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    /// Multiplier for a listing priced outside the requested budget.
    pub budget_penalty: f64,
    /// Multiplier for a listing of the wrong accommodation type.
    pub type_penalty: f64,
    /// Multiplier for a listing outside the requested location.
    pub location_penalty: f64,
    /// A listing this close to requested coordinates satisfies the location;
    /// up to twice as far is a partial match.
    pub location_radius_km: f64,
    /// `recommend` fuses `limit * candidate_multiplier` results before scoring.
    pub candidate_multiplier: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub start_radius_km: f64,
    pub widen_factor: f64,
    pub max_radius_km: f64,
    pub max_widenings: usize,
}

/// Per-call timeouts in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub index_ms: u64,
    pub embedding_ms: u64,
    pub intent_ms: u64,
    pub summary_ms: u64,
    /// Overall budget for one request, from intent extraction to summaries.
    pub request_deadline_ms: u64,
}

impl TimeoutConfig {
    pub fn index(&self) -> Duration {
        Duration::from_millis(self.index_ms)
    }

    pub fn embedding(&self) -> Duration {
        Duration::from_millis(self.embedding_ms)
    }

    pub fn intent(&self) -> Duration {
        Duration::from_millis(self.intent_ms)
    }

    pub fn summary(&self) -> Duration {
        Duration::from_millis(self.summary_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Only the first `summary_top_n` entries get an AI summary.
    pub summary_top_n: usize,
    pub summary_max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub scheme: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub index_prefix: String,
    pub max_retries: u32,
}

impl IndexConfig {
    pub fn base_url(&self) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}://{}:{}", self.scheme, self.host, self.port),
        }
    }

    pub fn listings_index(&self) -> String {
        format!("{}_real_estate", self.index_prefix)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub gemini_api_key: Option<String>,
    pub generative_model: String,
    /// Tried in order; the first model that answers wins.
    pub embedding_models: Vec<String>,
    pub embedding_dimension: usize,
    pub temperature: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            log_level: "info".to_string(),
            query: QueryConfig::default(),
            fusion: FusionWeights::default(),
            recommendation: PenaltyConfig::default(),
            geo: GeoConfig::default(),
            timeouts: TimeoutConfig::default(),
            assembler: AssemblerConfig::default(),
            index: IndexConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 50,
        }
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            lexical: 0.4,
            vector: 0.4,
            geo: 0.2,
            min_fused_score: 0.0,
        }
    }
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            budget_penalty: 0.5,
            type_penalty: 0.2,
            location_penalty: 0.7,
            location_radius_km: 5.0,
            candidate_multiplier: 3,
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            start_radius_km: 2.0,
            widen_factor: 2.0,
            max_radius_km: 20.0,
            max_widenings: 3,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            index_ms: 3_000,
            embedding_ms: 2_000,
            intent_ms: 4_000,
            summary_ms: 5_000,
            request_deadline_ms: 8_000,
        }
    }
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            summary_top_n: 5,
            summary_max_tokens: 160,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 9200,
            scheme: "http".to_string(),
            user: Some("elastic".to_string()),
            password: Some("changeme".to_string()),
            api_key: None,
            index_prefix: "ai_search".to_string(),
            max_retries: 2,
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            generative_model: "gemini-1.5-flash-002".to_string(),
            embedding_models: vec![
                "text-embedding-004".to_string(),
                "text-multilingual-embedding-002".to_string(),
            ],
            embedding_dimension: 768,
            temperature: 0.2,
        }
    }
}

impl EngineConfig {
    /// Validate config values, rejecting clearly broken configurations.
    pub fn validate(&self) -> Result<(), SearchError> {
        let invalid = |msg: &str| Err(SearchError::InvalidConfig(msg.to_string()));

        if self.query.default_limit == 0 {
            return invalid("query.default_limit must be > 0");
        }
        if self.query.max_limit < self.query.default_limit {
            return invalid("query.max_limit must be >= query.default_limit");
        }

        let weights = [self.fusion.lexical, self.fusion.vector, self.fusion.geo];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return invalid("fusion weights must be in [0.0, 1.0]");
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return invalid("at least one fusion weight must be > 0");
        }
        if !(0.0..=1.0).contains(&self.fusion.min_fused_score) {
            return invalid("fusion.min_fused_score must be in [0.0, 1.0]");
        }

        let penalties = [
            self.recommendation.budget_penalty,
            self.recommendation.type_penalty,
            self.recommendation.location_penalty,
        ];
        if penalties.iter().any(|p| *p <= 0.0 || *p > 1.0) {
            return invalid("recommendation penalties must be in (0.0, 1.0]");
        }
        if self.recommendation.location_radius_km <= 0.0 {
            return invalid("recommendation.location_radius_km must be > 0");
        }
        if self.recommendation.candidate_multiplier == 0 {
            return invalid("recommendation.candidate_multiplier must be > 0");
        }

        if self.geo.start_radius_km <= 0.0 {
            return invalid("geo.start_radius_km must be > 0");
        }
        if self.geo.max_radius_km < self.geo.start_radius_km {
            return invalid("geo.max_radius_km must be >= geo.start_radius_km");
        }
        if self.geo.widen_factor <= 1.0 {
            return invalid("geo.widen_factor must be > 1");
        }

        let t = &self.timeouts;
        if [t.index_ms, t.embedding_ms, t.intent_ms, t.summary_ms, t.request_deadline_ms]
            .contains(&0)
        {
            return invalid("timeouts must be > 0ms");
        }
        if t.intent_ms >= t.request_deadline_ms {
            return invalid("timeouts.intent_ms must be < timeouts.request_deadline_ms");
        }

        if self.ai.embedding_dimension == 0 {
            return invalid("ai.embedding_dimension must be > 0");
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from the process environment.
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override fields from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("ELASTICSEARCH_URL") {
            self.index.url = Some(url);
        }
        if let Some(host) = get("ELASTICSEARCH_HOST") {
            self.index.host = host;
        }
        if let Some(port) = get("ELASTICSEARCH_PORT").and_then(|p| p.parse().ok()) {
            self.index.port = port;
        }
        if let Some(scheme) = get("ELASTICSEARCH_SCHEME") {
            self.index.scheme = scheme;
        }
        if let Some(user) = get("ELASTICSEARCH_USER") {
            self.index.user = Some(user);
        }
        if let Some(password) = get("ELASTICSEARCH_PASSWORD") {
            self.index.password = Some(password);
        }
        if let Some(key) = get("ELASTICSEARCH_API_KEY") {
            self.index.api_key = Some(key);
        }
        if let Some(prefix) = get("ELASTICSEARCH_INDEX_PREFIX") {
            self.index.index_prefix = prefix;
        }
        if let Some(key) = get("GEMINI_API_KEY") {
            self.ai.gemini_api_key = Some(key);
        }
        if let Some(model) = get("VERTEX_AI_MODEL") {
            self.ai.generative_model = model;
        }
        if let Some(model) = get("VERTEX_AI_EMBEDDING_MODEL") {
            // Explicit model goes first, the rest stay as fallbacks.
            self.ai.embedding_models.retain(|m| m != &model);
            self.ai.embedding_models.insert(0, model);
        }
        if let Some(env) = get("ENVIRONMENT") {
            self.environment = if env.eq_ignore_ascii_case("production") {
                Environment::Production
            } else {
                Environment::Development
            };
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Some(max) = get("MAX_SEARCH_RESULTS").and_then(|m| m.parse().ok()) {
            self.query.max_limit = max;
        }
        if let Some(min) = get("MIN_RELEVANCE_SCORE").and_then(|m| m.parse().ok()) {
            self.fusion.min_fused_score = min;
        }
        self
    }
}
