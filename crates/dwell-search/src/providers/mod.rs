//! Boundary contracts for the external collaborators: the search index,
//! the embedding model and the generative model.
//!
//! The core only ever talks to these traits. `elasticsearch` and `gemini`
//! are the production adapters, `memory` holds the offline ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo;
use crate::types::{AccommodationType, GeoPoint, IndexStats, Listing};

pub mod elasticsearch;
pub mod gemini;
pub mod memory;

pub use elasticsearch::ElasticsearchIndex;
pub use gemini::{GeminiEmbedder, GeminiGenerator};
pub use memory::{DisabledEmbedder, DisabledGenerator, HashingEmbedder, InMemoryIndex};

/// Categorical filters a listing must match. Cities match across
/// spellings of the same city.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardFilters {
    pub city: Option<String>,
    pub accommodation_type: Option<AccommodationType>,
    /// Skip listings marked as no longer available.
    pub available_only: bool,
}

impl HardFilters {
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.accommodation_type.is_none() && !self.available_only
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        let city_ok = self
            .city
            .as_deref()
            .map_or(true, |city| geo::same_city(&listing.city, city));
        let type_ok = self
            .accommodation_type
            .map_or(true, |ty| listing.accommodation_type == ty);
        city_ok && type_ok && (!self.available_only || listing.is_available())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    /// Text match. `None` means filter-only.
    Text { text: Option<String> },
    /// Nearest neighbours of `embedding`.
    Vector { embedding: Vec<f32> },
    /// Listings within `radius_km` of `center`, closest first.
    Geo { center: GeoPoint, radius_km: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub mode: QueryMode,
    pub filters: HardFilters,
    pub size: usize,
    pub exclude_ids: Vec<String>,
}

impl IndexQuery {
    pub fn new(mode: QueryMode, filters: HardFilters, size: usize) -> Self {
        Self {
            mode,
            filters,
            size,
            exclude_ids: Vec::new(),
        }
    }
}

/// A listing and its raw score in the mode that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub listing: Listing,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredListing {
    pub listing: Listing,
    pub embedding: Option<Vec<f32>>,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    fn name(&self) -> &'static str;

    async fn query(&self, request: &IndexQuery) -> Result<Vec<IndexHit>>;

    /// Fetch a listing with its stored embedding.
    async fn get(&self, listing_id: &str) -> Result<Option<StoredListing>>;

    async fn stats(&self) -> Result<IndexStats>;

    async fn is_ready(&self) -> bool;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    async fn is_ready(&self) -> bool;
}

#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `instruction` over `text` and return the model's raw output.
    async fn generate(&self, instruction: &str, text: &str, max_tokens: usize) -> Result<String>;

    async fn is_ready(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_filters_match_case_insensitively() {
        let listing = Listing {
            listing_id: "L1".into(),
            city: "Bangalore".into(),
            accommodation_type: AccommodationType::Pg,
            ..Listing::default()
        };
        let filters = HardFilters {
            city: Some("bangalore".into()),
            accommodation_type: Some(AccommodationType::Pg),
            available_only: false,
        };
        assert!(filters.matches(&listing));

        let wrong_type = HardFilters {
            accommodation_type: Some(AccommodationType::Hostel),
            ..HardFilters::default()
        };
        assert!(!wrong_type.matches(&listing));
        assert!(HardFilters::default().matches(&listing));
    }

    #[test]
    fn test_city_filter_matches_alias_spellings() {
        let in_city = |city: &str| Listing {
            city: city.into(),
            ..Listing::default()
        };
        let filters = |city: &str| HardFilters {
            city: Some(city.into()),
            ..HardFilters::default()
        };

        assert!(filters("bangalore").matches(&in_city("Bengaluru")));
        assert!(filters("gurgaon").matches(&in_city("Gurugram")));
        assert!(filters("delhi").matches(&in_city("New Delhi")));
        assert!(!filters("delhi").matches(&in_city("Noida")));
        assert!(!filters("mumbai").matches(&in_city("Navi Mumbai")));
    }

    #[test]
    fn test_available_only_skips_rented_listings() {
        let with_status = |status: Option<&str>| Listing {
            status: status.map(str::to_string),
            ..Listing::default()
        };
        let filters = HardFilters {
            available_only: true,
            ..HardFilters::default()
        };

        assert!(filters.matches(&with_status(Some("available"))));
        assert!(filters.matches(&with_status(Some("Available"))));
        assert!(filters.matches(&with_status(None)));
        assert!(!filters.matches(&with_status(Some("rented"))));
        assert!(HardFilters::default().matches(&with_status(Some("rented"))));
    }
}
