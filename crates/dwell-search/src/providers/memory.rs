//! Offline providers: an in-process listing index, a deterministic hashing
//! embedder, and a generator that is always unavailable.
//!
//! Used for local runs against a listings file and by the test suite.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};

use super::{
    EmbeddingProvider, GenerativeProvider, IndexHit, IndexQuery, QueryMode, SearchIndex,
    StoredListing,
};
use crate::error::{Result, SearchError};
use crate::geo;
use crate::types::{IndexStats, Listing};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "in", "near", "for", "with", "at", "of", "and", "to", "on", "or", "by",
];

const MAX_STATS_VALUES: usize = 20;

/// Lowercased alphanumeric tokens with stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Listing index held in memory. Supports text, vector and geo queries.
pub struct InMemoryIndex {
    listings: Vec<StoredListing>,
}

impl InMemoryIndex {
    pub fn new(listings: Vec<StoredListing>) -> Self {
        Self { listings }
    }

    /// Build from bare listings, embedding each with `embedder`.
    pub fn from_listings(listings: Vec<Listing>, embedder: &HashingEmbedder) -> Self {
        let stored = listings
            .into_iter()
            .map(|listing| {
                let embedding = embedder.embed_text(&listing.combined_text());
                StoredListing {
                    listing,
                    embedding: Some(embedding),
                }
            })
            .collect();
        Self::new(stored)
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    fn eligible<'a>(&'a self, request: &'a IndexQuery) -> impl Iterator<Item = &'a StoredListing> {
        self.listings.iter().filter(move |stored| {
            request.filters.matches(&stored.listing)
                && !request.exclude_ids.contains(&stored.listing.listing_id)
        })
    }

    fn text_hits(&self, request: &IndexQuery, text: Option<&str>) -> Vec<IndexHit> {
        let Some(text) = text else {
            return self
                .eligible(request)
                .map(|stored| IndexHit {
                    listing: stored.listing.clone(),
                    score: 1.0,
                })
                .collect();
        };

        let terms: BTreeSet<String> = tokenize(text).into_iter().collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let docs: Vec<(&StoredListing, HashMap<String, usize>)> = self
            .eligible(request)
            .map(|stored| {
                let mut tf = HashMap::new();
                for token in tokenize(&stored.listing.combined_text()) {
                    *tf.entry(token).or_insert(0) += 1;
                }
                (stored, tf)
            })
            .collect();

        let n = docs.len().max(1) as f64;
        let idf: HashMap<&str, f64> = terms
            .iter()
            .map(|term| {
                let df = docs.iter().filter(|(_, tf)| tf.contains_key(term)).count() as f64;
                (term.as_str(), (1.0 + n / df.max(1.0)).ln())
            })
            .collect();

        docs.into_iter()
            .filter_map(|(stored, tf)| {
                let score: f64 = terms
                    .iter()
                    .filter_map(|term| {
                        tf.get(term)
                            .map(|count| idf[term.as_str()] * (1.0 + (*count as f64).ln()))
                    })
                    .sum();
                (score > 0.0).then(|| IndexHit {
                    listing: stored.listing.clone(),
                    score,
                })
            })
            .collect()
    }

    fn vector_hits(&self, request: &IndexQuery, embedding: &[f32]) -> Result<Vec<IndexHit>> {
        let mut hits = Vec::new();
        for stored in self.eligible(request) {
            let Some(vector) = stored.embedding.as_deref() else {
                continue;
            };
            if vector.len() != embedding.len() {
                return Err(SearchError::provider(
                    "memory-index",
                    format!(
                        "embedding dimension mismatch: query {} vs stored {}",
                        embedding.len(),
                        vector.len()
                    ),
                ));
            }
            let similarity = cosine_similarity(embedding, vector);
            if similarity > 0.0 {
                hits.push(IndexHit {
                    listing: stored.listing.clone(),
                    score: similarity as f64,
                });
            }
        }
        Ok(hits)
    }

    fn geo_hits(
        &self,
        request: &IndexQuery,
        center: crate::types::GeoPoint,
        radius_km: f64,
    ) -> Vec<IndexHit> {
        self.eligible(request)
            .filter_map(|stored| {
                let point = stored.listing.coordinates?;
                let distance = geo::haversine_km(center, point);
                (distance <= radius_km).then(|| IndexHit {
                    listing: stored.listing.clone(),
                    score: geo::proximity_score(distance),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    fn name(&self) -> &'static str {
        "memory-index"
    }

    async fn query(&self, request: &IndexQuery) -> Result<Vec<IndexHit>> {
        let mut hits = match &request.mode {
            QueryMode::Text { text } => self.text_hits(request, text.as_deref()),
            QueryMode::Vector { embedding } => self.vector_hits(request, embedding)?,
            QueryMode::Geo { center, radius_km } => self.geo_hits(request, *center, *radius_km),
        };

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.listing.listing_id.cmp(&b.listing.listing_id))
        });
        hits.truncate(request.size);
        Ok(hits)
    }

    async fn get(&self, listing_id: &str) -> Result<Option<StoredListing>> {
        Ok(self
            .listings
            .iter()
            .find(|stored| stored.listing.listing_id == listing_id)
            .cloned())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let collect = |f: fn(&Listing) -> String| -> Vec<String> {
            self.listings
                .iter()
                .map(|s| f(&s.listing))
                .filter(|v| !v.is_empty())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .take(MAX_STATS_VALUES)
                .collect()
        };

        Ok(IndexStats {
            total_listings: self.listings.len() as u64,
            accommodation_types: collect(|l| l.accommodation_type.as_str().to_string()),
            cities: collect(|l| l.city.clone()),
            platforms: collect(|l| l.platform_name.clone()),
        })
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

/// Deterministic bag-of-words embedding via feature hashing.
/// Texts sharing no tokens are orthogonal unless two tokens collide.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(768)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

/// Generator for LLM-disabled mode. Every call fails, so intent extraction
/// degrades to explicit fields and summaries are omitted.
#[derive(Debug, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl GenerativeProvider for DisabledGenerator {
    fn name(&self) -> &'static str {
        "disabled-generator"
    }

    async fn generate(
        &self,
        _instruction: &str,
        _text: &str,
        _max_tokens: usize,
    ) -> Result<String> {
        Err(SearchError::provider(
            "disabled-generator",
            "generation is disabled",
        ))
    }

    async fn is_ready(&self) -> bool {
        false
    }
}

/// Embedder that always fails; vector retrieval reports itself unavailable.
pub struct DisabledEmbedder {
    dimension: usize,
}

impl DisabledEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for DisabledEmbedder {
    fn name(&self) -> &'static str {
        "disabled-embedder"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(SearchError::provider(
            "disabled-embedder",
            "embeddings are disabled",
        ))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn is_ready(&self) -> bool {
        false
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
