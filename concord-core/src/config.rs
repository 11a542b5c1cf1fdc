use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ConcordConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub semantic: SemanticServiceConfig,
    pub search: SearchServiceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Semantic-analysis collaborator settings. The API key is read from the
/// `GOOGLE_API_KEY` environment variable, never from the config file.
#[derive(Debug, Deserialize, Clone)]
pub struct SemanticServiceConfig {
    pub model: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchServiceConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub idle_timeout_minutes: i64,
    pub sweep_interval_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 60,
            sweep_interval_minutes: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Trailing transcript window handed to the collaborator.
    pub window_messages: i64,
    /// Questions at or below this token count are treated as likely follow-ups.
    pub short_question_max_tokens: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            window_messages: 5,
            short_question_max_tokens: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorConfig {
    pub source_timeout_seconds: u64,
    pub cache_ttl_minutes: u64,
    pub cache_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            source_timeout_seconds: 10,
            cache_ttl_minutes: 30,
            cache_capacity: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsolidationConfig {
    /// Extracted entities below this confidence (0–1) are dropped.
    pub min_entity_confidence: f32,
    /// Text corrections at or above this confidence (0–1) are applied.
    pub correction_threshold: f32,
    /// Conflicts at or above this confidence (0–1) are resolved per
    /// recommendation; below it both values are kept and flagged.
    pub conflict_threshold: f32,
    /// Prior same-organization documents fetched for comparison.
    pub prior_document_limit: i64,
    /// Report confidence (0–1) when the collaborator fails outright.
    pub degraded_confidence: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            min_entity_confidence: 0.7,
            correction_threshold: 0.8,
            conflict_threshold: 0.8,
            prior_document_limit: 5,
            degraded_confidence: 0.5,
        }
    }
}

impl ConcordConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunable_sections_default_to_spec_values() {
        let session = SessionConfig::default();
        assert_eq!(session.idle_timeout_minutes, 60);

        let resolver = ResolverConfig::default();
        assert_eq!(resolver.window_messages, 5);
        assert_eq!(resolver.short_question_max_tokens, 5);

        let aggregator = AggregatorConfig::default();
        assert_eq!(aggregator.cache_ttl_minutes, 30);

        let consolidation = ConsolidationConfig::default();
        assert_eq!(consolidation.min_entity_confidence, 0.7);
        assert_eq!(consolidation.correction_threshold, 0.8);
        assert_eq!(consolidation.prior_document_limit, 5);
    }
}
