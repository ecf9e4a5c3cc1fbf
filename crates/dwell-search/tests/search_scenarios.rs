//! End-to-end scenarios against the in-memory index with scripted providers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dwell_search::providers::{IndexHit, IndexQuery, StoredListing};
use dwell_search::types::{ConstraintStatus, GeoPoint};
use dwell_search::{
    AccommodationType, DisabledGenerator, EmbeddingProvider, EngineConfig, GenerativeProvider,
    HashingEmbedder, InMemoryIndex, IndexStats, Listing, RawQuery, Result, SearchEngine,
    SearchError, SearchIndex, Subsystem,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn listing(id: &str, name: &str, description: &str, ty: AccommodationType, city: &str) -> Listing {
    Listing {
        listing_id: id.into(),
        name: name.into(),
        description: description.into(),
        accommodation_type: ty,
        city: city.into(),
        ..Listing::default()
    }
}

/// Three Mumbai apartments and two unrelated listings elsewhere.
fn mumbai_fixture() -> Vec<Listing> {
    vec![
        Listing {
            area: "Andheri West".into(),
            state: "Maharashtra".into(),
            price: Some(45_000.0),
            ..listing(
                "m1",
                "Sea Breeze 2BHK",
                "Spacious 2bhk apartment close to station",
                AccommodationType::Apartment,
                "Mumbai",
            )
        },
        Listing {
            area: "Powai".into(),
            state: "Maharashtra".into(),
            price: Some(52_000.0),
            ..listing(
                "m2",
                "Palm Residency",
                "2bhk apartment with balcony",
                AccommodationType::Apartment,
                "Mumbai",
            )
        },
        Listing {
            area: "Colaba".into(),
            state: "Maharashtra".into(),
            price: Some(38_000.0),
            ..listing(
                "m3",
                "Harbour Heights",
                "Sunny apartment near the harbour",
                AccommodationType::Apartment,
                "Mumbai",
            )
        },
        Listing {
            area: "Lajpat Nagar".into(),
            state: "Delhi".into(),
            price: Some(9_000.0),
            ..listing(
                "d1",
                "Green Leaf PG",
                "Paying guest rooms with meals",
                AccommodationType::Pg,
                "Delhi",
            )
        },
        Listing {
            area: "Jayanagar".into(),
            state: "Karnataka".into(),
            price: Some(6_000.0),
            ..listing(
                "b1",
                "Orchid Hostel",
                "Dorm beds for students",
                AccommodationType::Hostel,
                "Bangalore",
            )
        },
    ]
}

fn mumbai_query() -> RawQuery {
    RawQuery {
        search_type: Some("hybrid".into()),
        limit: Some(5),
        ..RawQuery::text("2bhk apartment mumbai")
    }
}

// ---------------------------------------------------------------------------
// Provider doubles
// ---------------------------------------------------------------------------

struct FailingIndex;

#[async_trait]
impl SearchIndex for FailingIndex {
    fn name(&self) -> &'static str {
        "failing-index"
    }

    async fn query(&self, _: &IndexQuery) -> Result<Vec<IndexHit>> {
        Err(SearchError::provider("failing-index", "connection refused"))
    }

    async fn get(&self, _: &str) -> Result<Option<StoredListing>> {
        Err(SearchError::provider("failing-index", "connection refused"))
    }

    async fn stats(&self) -> Result<IndexStats> {
        Err(SearchError::provider("failing-index", "connection refused"))
    }

    async fn is_ready(&self) -> bool {
        false
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &'static str {
        "failing-embedder"
    }

    async fn embed(&self, _: &str) -> Result<Vec<f32>> {
        Err(SearchError::provider("failing-embedder", "quota exceeded"))
    }

    fn dimension(&self) -> usize {
        768
    }

    async fn is_ready(&self) -> bool {
        false
    }
}

/// Answers intent extraction with `extraction` and summarizes every listing
/// except those whose prompt mentions `refuse`.
struct ScriptedGenerator {
    extraction: &'static str,
    refuse: &'static str,
}

#[async_trait]
impl GenerativeProvider for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, instruction: &str, text: &str, _: usize) -> Result<String> {
        if instruction.contains("extract search constraints") {
            return Ok(self.extraction.to_string());
        }
        if text.contains(self.refuse) {
            return Err(SearchError::provider("scripted", "safety filter"));
        }
        let name = text
            .lines()
            .find_map(|l| l.strip_prefix("Name: "))
            .unwrap_or_default();
        Ok(format!("{} is a good match.", name))
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

/// Sleeps far past any sensible timeout before answering.
struct StalledGenerator;

#[async_trait]
impl GenerativeProvider for StalledGenerator {
    fn name(&self) -> &'static str {
        "stalled-generator"
    }

    async fn generate(&self, _: &str, _: &str, _: usize) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("{}".to_string())
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

struct StalledEmbedder;

#[async_trait]
impl EmbeddingProvider for StalledEmbedder {
    fn name(&self) -> &'static str {
        "stalled-embedder"
    }

    async fn embed(&self, _: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![0.0; 768])
    }

    fn dimension(&self) -> usize {
        768
    }

    async fn is_ready(&self) -> bool {
        true
    }
}

fn engine_with(
    listings: Vec<Listing>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerativeProvider>,
) -> SearchEngine {
    let config = EngineConfig::default();
    let index_embedder = HashingEmbedder::new(config.ai.embedding_dimension);
    let index = InMemoryIndex::from_listings(listings, &index_embedder);
    SearchEngine::new(config, Arc::new(index), embedder, generator).unwrap()
}

fn offline_engine(listings: Vec<Listing>) -> SearchEngine {
    engine_with(
        listings,
        Arc::new(HashingEmbedder::default()),
        Arc::new(DisabledGenerator),
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hybrid_query_returns_only_matching_listings() {
    let engine = offline_engine(mumbai_fixture());
    let response = engine.search(&mumbai_query()).await.unwrap();

    let mut ids: Vec<&str> = response
        .results
        .iter()
        .map(|r| r.item.listing_id())
        .collect();
    assert_eq!(response.results.len(), 3);
    assert_eq!(response.results[2].item.listing_id(), "m3");
    ids.sort();
    assert_eq!(ids, vec!["m1", "m2", "m3"]);

    for (i, entry) in response.results.iter().enumerate() {
        assert_eq!(entry.item.rank, i + 1);
    }
    for pair in response.results.windows(2) {
        assert!(pair[0].item.fused_score >= pair[1].item.fused_score);
    }
}

#[tokio::test]
async fn out_of_budget_pg_ranks_below_in_budget_pg() {
    let spot = GeoPoint::new(12.9352, 77.6245);
    let pg = |id: &str, price: f64| Listing {
        price: Some(price),
        coordinates: Some(spot),
        ..listing(id, "Shared PG", "Rooms with meals", AccommodationType::Pg, "Bangalore")
    };
    // Ids chosen so fusion's tie-break puts the expensive one first.
    let listings = vec![pg("a-over", 25_000.0), pg("b-fits", 12_000.0)];
    let engine = offline_engine(listings);

    let raw = RawQuery {
        budget_min: Some(8_000.0),
        budget_max: Some(20_000.0),
        location: Some("bangalore".into()),
        accommodation_type: Some("pg".into()),
        ..RawQuery::default()
    };

    let search = engine.search(&raw).await.unwrap();
    assert_eq!(search.results[0].item.listing_id(), "a-over");
    assert_eq!(
        search.results[0].item.fused_score,
        search.results[1].item.fused_score
    );

    let response = engine.recommend(&raw).await.unwrap();
    let ids: Vec<&str> = response
        .results
        .iter()
        .map(|r| r.item.listing().listing_id.as_str())
        .collect();
    assert_eq!(ids, vec!["b-fits", "a-over"]);

    let over = &response.results[1].item;
    assert!(over.recommendation_score < response.results[0].item.recommendation_score);
    assert_eq!(over.result.rank, 2);
    assert!(over
        .constraints
        .iter()
        .any(|c| c.to_string() == "budget: violated"));
    assert!(over
        .constraints
        .iter()
        .filter(|c| c.to_string() != "budget: violated")
        .all(|c| c.status == ConstraintStatus::Satisfied));
}

#[tokio::test]
async fn city_filter_keeps_alias_spellings() {
    let pg = |id: &str, city: &str| {
        listing(id, "Shared PG", "Rooms with meals", AccommodationType::Pg, city)
    };
    let engine = offline_engine(vec![
        pg("a", "Bengaluru"),
        pg("b", "Bangalore"),
        pg("g", "Gurugram"),
        pg("n", "New Delhi"),
    ]);

    let cases = [
        ("bangalore", vec!["a", "b"]),
        ("bengaluru", vec!["a", "b"]),
        ("gurugram", vec!["g"]),
        ("new delhi", vec!["n"]),
    ];
    for (location, expected) in cases {
        let raw = RawQuery {
            location: Some(location.into()),
            accommodation_type: Some("pg".into()),
            search_type: Some("keyword".into()),
            ..RawQuery::default()
        };
        let response = engine.search(&raw).await.unwrap();
        let mut ids: Vec<&str> = response
            .results
            .iter()
            .map(|r| r.item.listing_id())
            .collect();
        ids.sort();
        assert_eq!(ids, expected, "location {}", location);
    }
}

#[tokio::test]
async fn total_outage_is_retrieval_unavailable() {
    let engine = SearchEngine::new(
        EngineConfig::default(),
        Arc::new(FailingIndex),
        Arc::new(HashingEmbedder::default()),
        Arc::new(DisabledGenerator),
    )
    .unwrap();

    let raw = RawQuery {
        location: Some("mumbai".into()),
        ..mumbai_query()
    };
    let result = engine.search(&raw).await;
    assert!(matches!(result, Err(SearchError::RetrievalUnavailable(_))));

    let result = engine.recommend(&raw).await;
    assert!(matches!(result, Err(SearchError::RetrievalUnavailable(_))));
}

#[tokio::test]
async fn vector_failure_degrades_but_returns_results() {
    let engine = engine_with(
        mumbai_fixture(),
        Arc::new(FailingEmbedder),
        Arc::new(DisabledGenerator),
    );
    let response = engine.search(&mumbai_query()).await.unwrap();

    assert_eq!(response.results.len(), 3);
    assert!(response.degraded);
    assert!(response.unavailable.contains(&Subsystem::Vector));
    assert!(!response.unavailable.contains(&Subsystem::Lexical));
}

#[tokio::test]
async fn slow_providers_share_one_request_deadline() {
    let mut config = EngineConfig::default();
    config.timeouts.intent_ms = 700;
    config.timeouts.embedding_ms = 10_000;
    config.timeouts.summary_ms = 10_000;
    config.timeouts.request_deadline_ms = 1_000;
    let index = InMemoryIndex::from_listings(mumbai_fixture(), &HashingEmbedder::default());
    let engine = SearchEngine::new(
        config,
        Arc::new(index),
        Arc::new(StalledEmbedder),
        Arc::new(StalledGenerator),
    )
    .unwrap();

    let start = Instant::now();
    let response = engine.search(&mumbai_query()).await.unwrap();
    let elapsed = start.elapsed();

    // Intent (700ms) and retrieval must fit in the same 1s budget.
    assert!(elapsed < Duration::from_millis(1_500), "took {:?}", elapsed);
    assert_eq!(response.results.len(), 3);
    assert!(response.unavailable.contains(&Subsystem::Intent));
    assert!(response.unavailable.contains(&Subsystem::Vector));
    assert!(response.unavailable.contains(&Subsystem::Summaries));
    assert!(response.results.iter().all(|r| r.summary.is_none()));
}

#[tokio::test]
async fn intent_failure_falls_back_to_raw_text() {
    let engine = offline_engine(mumbai_fixture());
    let response = engine.search(&mumbai_query()).await.unwrap();

    assert!(response.degraded);
    assert!(response.unavailable.contains(&Subsystem::Intent));
    assert_eq!(response.results.len(), 3);
}

#[tokio::test]
async fn one_failed_summary_keeps_the_rest() {
    let engine = engine_with(
        mumbai_fixture(),
        Arc::new(HashingEmbedder::default()),
        Arc::new(ScriptedGenerator {
            extraction: r#"{"keywords": []}"#,
            refuse: "Harbour",
        }),
    );
    let response = engine.search(&mumbai_query()).await.unwrap();

    assert_eq!(response.results.len(), 3);
    assert_eq!(
        response.unavailable.iter().copied().collect::<Vec<_>>(),
        vec![Subsystem::Summaries]
    );
    for entry in &response.results {
        if entry.item.listing_id() == "m3" {
            assert!(entry.summary.is_none());
        } else {
            assert!(entry
                .summary
                .as_deref()
                .is_some_and(|s| s.ends_with("is a good match.")));
        }
    }
}

#[tokio::test]
async fn extracted_city_filters_results() {
    let engine = engine_with(
        mumbai_fixture(),
        Arc::new(HashingEmbedder::default()),
        Arc::new(ScriptedGenerator {
            extraction: r#"{"location": "Mumbai", "accommodation_type": "apartment",
                "bedrooms": 2, "keywords": ["2bhk", "apartment"],
                "confidence": {"location": 0.95, "accommodation_type": 0.9}}"#,
            refuse: "\u{0}",
        }),
    );
    let response = engine.search(&mumbai_query()).await.unwrap();

    assert!(!response.unavailable.contains(&Subsystem::Intent));
    assert!(!response.results.is_empty());
    assert!(response
        .results
        .iter()
        .all(|r| r.item.listing().city == "Mumbai"));
    assert!(response.results.iter().all(|r| r.summary.is_some()));
}

#[tokio::test]
async fn search_response_serializes_flat_entries() {
    let engine = offline_engine(mumbai_fixture());
    let response = engine.search(&mumbai_query()).await.unwrap();
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["degraded"], true);
    assert_eq!(json["results"][0]["rank"], 1);
    assert!(json["results"][0].get("summary").is_none());
    assert!(json["unavailable"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("intent")));
}
