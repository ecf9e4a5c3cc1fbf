use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::assembler::ResultAssembler;
use crate::config::EngineConfig;
use crate::error::{with_timeout, Result, SearchError};
use crate::fusion::FusionRanker;
use crate::intent::{Intent, IntentExtractor};
use crate::providers::{
    DisabledGenerator, EmbeddingProvider, GenerativeProvider, HardFilters, HashingEmbedder,
    InMemoryIndex, IndexQuery, QueryMode, SearchIndex,
};
use crate::query::{Query, QueryNormalizer, RawQuery};
use crate::recommend::RecommendationScorer;
use crate::retrieval::{GeoRetriever, LexicalRetriever, RetrievalSet, Retriever, VectorRetriever};
use crate::types::{
    Candidate, HealthReport, IndexStats, Listing, RankedResult, RecommendResponse, Response,
    SearchResponse, SimilarResponse, StrategyKind, Subsystem,
};

/// The search and recommendation pipeline over one index and its providers.
pub struct SearchEngine {
    config: EngineConfig,
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerativeProvider>,
    normalizer: QueryNormalizer,
    intents: IntentExtractor,
    retrieval: RetrievalSet,
    fusion: FusionRanker,
    scorer: RecommendationScorer,
    assembler: ResultAssembler,
}

/// Fused results of one request, before assembly.
struct Retrieved {
    intent: Arc<Intent>,
    results: Vec<RankedResult>,
    unavailable: BTreeSet<Subsystem>,
}

impl SearchEngine {
    pub fn new(
        config: EngineConfig,
        index: Arc<dyn SearchIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerativeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let timeouts = &config.timeouts;

        let retrievers: Vec<Arc<dyn Retriever>> = vec![
            Arc::new(LexicalRetriever::new(Arc::clone(&index), timeouts.index())),
            Arc::new(VectorRetriever::new(
                Arc::clone(&index),
                Arc::clone(&embedder),
                timeouts.index(),
                timeouts.embedding(),
            )),
            Arc::new(GeoRetriever::new(
                Arc::clone(&index),
                timeouts.index(),
                config.geo.clone(),
            )),
        ];

        tracing::info!(
            index = index.name(),
            embedder = embedder.name(),
            generator = generator.name(),
            "search engine ready"
        );

        Ok(Self {
            normalizer: QueryNormalizer::new(config.query.clone()),
            intents: IntentExtractor::new(Arc::clone(&generator), timeouts.intent()),
            retrieval: RetrievalSet::new(retrievers),
            fusion: FusionRanker::new(config.fusion.clone()),
            scorer: RecommendationScorer::new(config.recommendation.clone()),
            assembler: ResultAssembler::new(
                Arc::clone(&generator),
                config.assembler.clone(),
                timeouts.summary(),
            ),
            index,
            embedder,
            generator,
            config,
        })
    }

    /// Engine over an in-memory listing set with hashed embeddings and no
    /// generative model.
    pub fn in_memory(config: EngineConfig, listings: Vec<Listing>) -> Result<Self> {
        let embedder = HashingEmbedder::new(config.ai.embedding_dimension);
        let index = InMemoryIndex::from_listings(listings, &embedder);
        Self::new(
            config,
            Arc::new(index),
            Arc::new(embedder),
            Arc::new(DisabledGenerator),
        )
    }

    /// Ranked listings for a query, best first.
    pub async fn search(&self, raw: &RawQuery) -> Result<SearchResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("search", %request_id);
        self.search_inner(request_id, raw).instrument(span).await
    }

    async fn search_inner(&self, request_id: Uuid, raw: &RawQuery) -> Result<SearchResponse> {
        let deadline = self.deadline();
        let query = self.normalizer.normalize(raw)?;
        let retrieved = self.retrieve(&query, query.limit(), deadline).await?;

        let assembly = self
            .assembler
            .assemble(retrieved.results, query.free_text(), deadline)
            .await;
        let mut unavailable = retrieved.unavailable;
        if assembly.summaries_failed {
            unavailable.insert(Subsystem::Summaries);
        }

        tracing::info!(
            results = assembly.results.len(),
            degraded = !unavailable.is_empty(),
            ?unavailable,
            "search complete"
        );
        Ok(Response {
            request_id,
            query,
            results: assembly.results,
            degraded: !unavailable.is_empty(),
            unavailable,
        })
    }

    /// Listings re-ranked against the query's explicit budget, type and
    /// location constraints.
    pub async fn recommend(&self, raw: &RawQuery) -> Result<RecommendResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("recommend", %request_id);
        self.recommend_inner(request_id, raw).instrument(span).await
    }

    async fn recommend_inner(&self, request_id: Uuid, raw: &RawQuery) -> Result<RecommendResponse> {
        let deadline = self.deadline();
        let query = self.normalizer.normalize(raw)?;
        let pool = query
            .limit()
            .saturating_mul(self.config.recommendation.candidate_multiplier);
        let retrieved = self.retrieve(&query, pool, deadline).await?;

        let recommendations = self
            .scorer
            .score(retrieved.results, &query.constraints(), query.limit());

        let assembly = self
            .assembler
            .assemble(recommendations, retrieved.intent.free_text(), deadline)
            .await;
        let mut unavailable = retrieved.unavailable;
        if assembly.summaries_failed {
            unavailable.insert(Subsystem::Summaries);
        }

        tracing::info!(
            results = assembly.results.len(),
            pool,
            degraded = !unavailable.is_empty(),
            "recommend complete"
        );
        Ok(Response {
            request_id,
            query,
            results: assembly.results,
            degraded: !unavailable.is_empty(),
            unavailable,
        })
    }

    /// Listings closest to a known listing's embedding, excluding itself.
    pub async fn similar(&self, listing_id: &str, limit: Option<i64>) -> Result<SimilarResponse> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("similar", %request_id, listing_id);
        self.similar_inner(request_id, listing_id, limit)
            .instrument(span)
            .await
    }

    async fn similar_inner(
        &self,
        request_id: Uuid,
        listing_id: &str,
        limit: Option<i64>,
    ) -> Result<SimilarResponse> {
        let limit = self.normalizer.clamp_limit(limit);
        let timeouts = &self.config.timeouts;
        let unavailable = |e: SearchError| SearchError::RetrievalUnavailable(e.to_string());

        let stored = with_timeout(self.index.name(), timeouts.index(), self.index.get(listing_id))
            .await
            .map_err(unavailable)?
            .ok_or_else(|| SearchError::NotFound(listing_id.to_string()))?;

        let embedding = match stored.embedding {
            Some(embedding) => embedding,
            None => with_timeout(
                self.embedder.name(),
                timeouts.embedding(),
                self.embedder.embed(&stored.listing.combined_text()),
            )
            .await
            .map_err(unavailable)?,
        };

        let available = HardFilters {
            available_only: true,
            ..HardFilters::default()
        };
        let mut request = IndexQuery::new(QueryMode::Vector { embedding }, available, limit);
        request.exclude_ids.push(listing_id.to_string());
        let hits = with_timeout(self.index.name(), timeouts.index(), self.index.query(&request))
            .await
            .map_err(unavailable)?;

        let candidates = hits
            .into_iter()
            .filter(|hit| hit.listing.listing_id != listing_id)
            .map(|hit| Candidate::scored(hit.listing, StrategyKind::Vector, hit.score))
            .collect();
        let results = self.fusion.fuse(candidates, limit);

        tracing::info!(results = results.len(), "similar complete");
        Ok(SimilarResponse {
            request_id,
            listing_id: listing_id.to_string(),
            results,
        })
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        with_timeout(self.index.name(), self.config.timeouts.index(), self.index.stats())
            .await
            .map_err(|e| SearchError::RetrievalUnavailable(e.to_string()))
    }

    /// Readiness of the index and both model providers.
    pub async fn health(&self) -> HealthReport {
        let (index, embeddings, generation) = tokio::join!(
            self.index.is_ready(),
            self.embedder.is_ready(),
            self.generator.is_ready(),
        );
        let status = match (index, embeddings && generation) {
            (true, true) => "healthy",
            (true, false) => "degraded",
            (false, _) => "unhealthy",
        };
        HealthReport {
            status: status.to_string(),
            index,
            embeddings,
            generation,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// When the current request must be answered by.
    fn deadline(&self) -> Instant {
        Instant::now() + self.config.timeouts.request_deadline()
    }

    /// Intent, concurrent retrieval and fusion, shared by search and recommend.
    async fn retrieve(&self, query: &Query, pool: usize, deadline: Instant) -> Result<Retrieved> {
        let intent = Arc::new(self.intents.extract(query, deadline).await);
        let mut unavailable = BTreeSet::new();
        if intent.is_degraded() {
            unavailable.insert(Subsystem::Intent);
        }

        let outcome = self
            .retrieval
            .retrieve_all(
                Arc::clone(&intent),
                query.search_type().strategies(),
                pool,
                deadline,
            )
            .await?;
        unavailable.extend(outcome.failed.iter().copied().map(Subsystem::from));

        let results = self.fusion.fuse(outcome.candidates, pool);
        Ok(Retrieved {
            intent,
            results,
            unavailable,
        })
    }
}
