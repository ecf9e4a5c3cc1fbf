//! Retrieval strategies and their concurrent orchestration.
//!
//! Each strategy wraps one query mode of the search index. They run as
//! independent tasks, each writing into its own slot, and are joined against
//! the request deadline. A strategy that fails or misses the deadline
//! contributes nothing; retrieval only fails when every strategy that was
//! attempted failed.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::GeoConfig;
use crate::error::{with_timeout, Result, SearchError};
use crate::intent::Intent;
use crate::providers::{EmbeddingProvider, IndexQuery, QueryMode, SearchIndex};
use crate::types::{Candidate, StrategyKind};

#[async_trait]
pub trait Retriever: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether the intent carries enough for this strategy to run at all.
    fn applies(&self, intent: &Intent) -> bool;

    /// Candidates ordered best first, each carrying this strategy's score.
    async fn retrieve(&self, intent: &Intent, limit: usize) -> Result<Vec<Candidate>>;
}

fn to_candidates(kind: StrategyKind, hits: Vec<crate::providers::IndexHit>) -> Vec<Candidate> {
    hits.into_iter()
        .filter(|hit| hit.score.is_finite())
        .map(|hit| Candidate::scored(hit.listing, kind, hit.score))
        .collect()
}

/// Text match on the index, with location and type as hard filters.
pub struct LexicalRetriever {
    index: Arc<dyn SearchIndex>,
    timeout: Duration,
}

impl LexicalRetriever {
    pub fn new(index: Arc<dyn SearchIndex>, timeout: Duration) -> Self {
        Self { index, timeout }
    }
}

#[async_trait]
impl Retriever for LexicalRetriever {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Lexical
    }

    fn applies(&self, intent: &Intent) -> bool {
        intent.search_text().is_some() || !intent.hard_filters().is_empty()
    }

    async fn retrieve(&self, intent: &Intent, limit: usize) -> Result<Vec<Candidate>> {
        let request = IndexQuery::new(
            QueryMode::Text {
                text: intent.search_text(),
            },
            intent.hard_filters(),
            limit,
        );
        let hits = with_timeout(self.index.name(), self.timeout, self.index.query(&request)).await?;
        Ok(to_candidates(self.kind(), hits))
    }
}

/// Nearest neighbours of the query embedding.
pub struct VectorRetriever {
    index: Arc<dyn SearchIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    index_timeout: Duration,
    embedding_timeout: Duration,
}

impl VectorRetriever {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        index_timeout: Duration,
        embedding_timeout: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            index_timeout,
            embedding_timeout,
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Vector
    }

    fn applies(&self, intent: &Intent) -> bool {
        intent.search_text().is_some()
    }

    async fn retrieve(&self, intent: &Intent, limit: usize) -> Result<Vec<Candidate>> {
        let Some(text) = intent.search_text() else {
            return Ok(Vec::new());
        };

        let embedding = with_timeout(
            self.embedder.name(),
            self.embedding_timeout,
            self.embedder.embed(&text),
        )
        .await?;
        if embedding.len() != self.embedder.dimension() {
            return Err(SearchError::provider(
                self.embedder.name(),
                format!(
                    "embedding has {} dimensions, expected {}",
                    embedding.len(),
                    self.embedder.dimension()
                ),
            ));
        }

        let request =
            IndexQuery::new(QueryMode::Vector { embedding }, intent.hard_filters(), limit);
        let hits =
            with_timeout(self.index.name(), self.index_timeout, self.index.query(&request)).await?;
        Ok(to_candidates(self.kind(), hits))
    }
}

/// Listings around the intent's location, widening the radius while too
/// few come back.
pub struct GeoRetriever {
    index: Arc<dyn SearchIndex>,
    timeout: Duration,
    config: GeoConfig,
}

impl GeoRetriever {
    pub fn new(index: Arc<dyn SearchIndex>, timeout: Duration, config: GeoConfig) -> Self {
        Self {
            index,
            timeout,
            config,
        }
    }
}

#[async_trait]
impl Retriever for GeoRetriever {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Geo
    }

    fn applies(&self, intent: &Intent) -> bool {
        intent.geo_center().is_some()
    }

    async fn retrieve(&self, intent: &Intent, limit: usize) -> Result<Vec<Candidate>> {
        let Some(center) = intent.geo_center() else {
            return Ok(Vec::new());
        };
        let filters = intent.hard_filters();

        let mut radius_km = self.config.start_radius_km;
        let mut widenings = 0;
        loop {
            let request = IndexQuery::new(
                QueryMode::Geo { center, radius_km },
                filters.clone(),
                limit,
            );
            let hits =
                with_timeout(self.index.name(), self.timeout, self.index.query(&request)).await?;

            let exhausted = widenings >= self.config.max_widenings
                || radius_km >= self.config.max_radius_km;
            if hits.len() >= limit || exhausted {
                tracing::debug!(radius_km, widenings, hits = hits.len(), "geo retrieval done");
                return Ok(to_candidates(self.kind(), hits));
            }

            radius_km = (radius_km * self.config.widen_factor).min(self.config.max_radius_km);
            widenings += 1;
        }
    }
}

/// Candidates from every strategy that answered, plus those that did not.
#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    /// Concatenated per-strategy results, in strategy order.
    pub candidates: Vec<Candidate>,
    pub failed: BTreeSet<StrategyKind>,
}

/// Runs the active strategies concurrently under the request deadline.
pub struct RetrievalSet {
    retrievers: Vec<Arc<dyn Retriever>>,
}

impl RetrievalSet {
    pub fn new(mut retrievers: Vec<Arc<dyn Retriever>>) -> Self {
        retrievers.sort_by_key(|r| r.kind());
        Self { retrievers }
    }

    pub async fn retrieve_all(
        &self,
        intent: Arc<Intent>,
        active: &[StrategyKind],
        limit: usize,
        deadline: Instant,
    ) -> Result<RetrievalOutcome> {
        let mut handles = Vec::new();
        for retriever in &self.retrievers {
            let kind = retriever.kind();
            if !active.contains(&kind) {
                continue;
            }
            if !retriever.applies(&intent) {
                tracing::debug!(strategy = %kind, "strategy not applicable, skipping");
                continue;
            }

            let retriever = Arc::clone(retriever);
            let intent = Arc::clone(&intent);
            let span = tracing::info_span!("retrieve", strategy = %kind);
            let task = async move { retriever.retrieve(&intent, limit).await };
            let handle = tokio::spawn(task.instrument(span));
            handles.push((kind, handle));
        }

        let attempted = handles.len();
        let mut outcome = RetrievalOutcome::default();
        let mut errors = Vec::new();

        for (kind, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(candidates))) => {
                    tracing::debug!(
                        strategy = %kind,
                        count = candidates.len(),
                        "strategy returned"
                    );
                    outcome.candidates.extend(candidates);
                }
                Ok(Ok(Err(e))) => {
                    if e.is_recoverable() {
                        tracing::warn!(strategy = %kind, "retrieval strategy failed: {}", e);
                    } else {
                        tracing::error!(strategy = %kind, "retrieval strategy failed: {}", e);
                    }
                    errors.push(format!("{}: {}", kind, e));
                    outcome.failed.insert(kind);
                }
                Ok(Err(join_error)) => {
                    tracing::error!(
                        strategy = %kind,
                        error = %join_error,
                        "retrieval task aborted"
                    );
                    errors.push(format!("{}: task failed", kind));
                    outcome.failed.insert(kind);
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        strategy = %kind,
                        "retrieval strategy missed the request deadline"
                    );
                    errors.push(format!("{}: deadline exceeded", kind));
                    outcome.failed.insert(kind);
                }
            }
        }

        if attempted > 0 && outcome.failed.len() == attempted {
            return Err(SearchError::RetrievalUnavailable(errors.join("; ")));
        }
        Ok(outcome)
    }
}
