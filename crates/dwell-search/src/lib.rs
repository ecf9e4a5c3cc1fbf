pub mod assembler;
pub mod config;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod geo;
pub mod intent;
pub mod providers;
pub mod query;
pub mod recommend;
pub mod retrieval;
pub mod types;

// Re-export primary types for convenience
pub use config::{EngineConfig, Environment};
pub use engine::SearchEngine;
pub use error::{Result, SearchError};
pub use intent::{Intent, IntentExtractor};
pub use query::{Query, QueryNormalizer, RawQuery};
pub use types::{
    AccommodationType, HealthReport, IndexStats, Listing, RankedResult, RecommendResponse,
    Recommendation, SearchResponse, SearchType, SimilarResponse, Subsystem,
};

// Re-export provider contracts and adapters
pub use providers::{
    DisabledEmbedder, DisabledGenerator, ElasticsearchIndex, EmbeddingProvider, GeminiEmbedder,
    GeminiGenerator, GenerativeProvider, HashingEmbedder, InMemoryIndex, SearchIndex,
};

pub use uuid::Uuid;
