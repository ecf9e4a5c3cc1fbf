//! Intent extraction.
//!
//! One call to the generative provider per request turns free text into
//! structured constraints. Explicit query fields always win over extracted
//! ones. When the provider fails, times out or answers with something that
//! is not JSON, the intent carries only the explicit fields and is flagged
//! degraded; retrieval then falls back to the raw free text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{time_left, with_timeout, Result, SearchError};
use crate::geo;
use crate::providers::{GenerativeProvider, HardFilters};
use crate::query::Query;
use crate::types::{AccommodationType, GeoPoint, Location};

/// Extracted values below this confidence never become hard filters.
const MIN_FILTER_CONFIDENCE: f64 = 0.5;
const DEFAULT_EXTRACTED_CONFIDENCE: f64 = 0.7;
const MAX_KEYWORDS: usize = 12;
const EXTRACTION_MAX_TOKENS: usize = 256;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldSource {
    Explicit,
    Extracted,
}

/// A constraint value with where it came from and how sure we are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentField<T> {
    pub value: T,
    pub confidence: f64,
    pub source: FieldSource,
}

impl<T> IntentField<T> {
    fn explicit(value: T) -> Self {
        Self {
            value,
            confidence: 1.0,
            source: FieldSource::Explicit,
        }
    }

    fn extracted(value: T, confidence: f64) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
            source: FieldSource::Extracted,
        }
    }

    fn is_explicit(&self) -> bool {
        self.source == FieldSource::Explicit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Wanted,
    Avoided,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmenityPreference {
    pub amenity: String,
    pub sentiment: Sentiment,
}

/// Structured constraints for one request. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    free_text: Option<String>,
    budget_min: Option<IntentField<f64>>,
    budget_max: Option<IntentField<f64>>,
    accommodation_type: Option<IntentField<AccommodationType>>,
    location: Option<IntentField<Location>>,
    bedrooms: Option<IntentField<u32>>,
    amenities: Vec<AmenityPreference>,
    keywords: Vec<String>,
    degraded: bool,
}

impl Intent {
    /// Intent built from the explicit query fields alone.
    pub fn from_query(query: &Query) -> Self {
        Self {
            free_text: query.free_text().map(str::to_string),
            budget_min: query.budget_min().map(IntentField::explicit),
            budget_max: query.budget_max().map(IntentField::explicit),
            accommodation_type: Some(query.accommodation_type())
                .filter(AccommodationType::is_specified)
                .map(IntentField::explicit),
            location: query.location().cloned().map(IntentField::explicit),
            bedrooms: None,
            amenities: Vec::new(),
            keywords: Vec::new(),
            degraded: false,
        }
    }

    fn degraded(query: &Query) -> Self {
        Self {
            degraded: true,
            ..Self::from_query(query)
        }
    }

    pub fn free_text(&self) -> Option<&str> {
        self.free_text.as_deref()
    }

    pub fn budget_min(&self) -> Option<&IntentField<f64>> {
        self.budget_min.as_ref()
    }

    pub fn budget_max(&self) -> Option<&IntentField<f64>> {
        self.budget_max.as_ref()
    }

    pub fn accommodation_type(&self) -> Option<&IntentField<AccommodationType>> {
        self.accommodation_type.as_ref()
    }

    pub fn location(&self) -> Option<&IntentField<Location>> {
        self.location.as_ref()
    }

    pub fn bedrooms(&self) -> Option<&IntentField<u32>> {
        self.bedrooms.as_ref()
    }

    pub fn amenities(&self) -> &[AmenityPreference] {
        &self.amenities
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Text for lexical matching and query embedding: extracted keywords
    /// when there are any, otherwise the raw free text.
    pub fn search_text(&self) -> Option<String> {
        if !self.keywords.is_empty() {
            return Some(self.keywords.join(" "));
        }
        self.free_text.clone()
    }

    /// Location and type constraints usable as exact-match filters.
    pub fn hard_filters(&self) -> HardFilters {
        let confident = |confidence: f64| confidence >= MIN_FILTER_CONFIDENCE;

        let city = self
            .location
            .as_ref()
            .filter(|f| confident(f.confidence))
            .and_then(|f| f.value.place_name())
            .and_then(geo::canonical_city)
            .map(str::to_string);

        let accommodation_type = self
            .accommodation_type
            .as_ref()
            .filter(|f| confident(f.confidence))
            .map(|f| f.value);

        HardFilters {
            city,
            accommodation_type,
            available_only: false,
        }
    }

    /// Centre point for geo retrieval, when the location resolves.
    pub fn geo_center(&self) -> Option<GeoPoint> {
        self.location.as_ref().and_then(|f| geo::resolve(&f.value))
    }

    fn merge(query: &Query, extraction: Extraction) -> Self {
        let mut intent = Self::from_query(query);
        let confidence = |field: &str| {
            extraction
                .confidence
                .get(field)
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_EXTRACTED_CONFIDENCE)
        };

        if intent.budget_min.is_none() {
            intent.budget_min = extraction
                .budget_min
                .as_ref()
                .and_then(parse_amount)
                .map(|v| IntentField::extracted(v, confidence("budget_min")));
        }
        if intent.budget_max.is_none() {
            intent.budget_max = extraction
                .budget_max
                .as_ref()
                .and_then(parse_amount)
                .map(|v| IntentField::extracted(v, confidence("budget_max")));
        }
        if let (Some(min), Some(max)) = (&intent.budget_min, &intent.budget_max) {
            if min.value > max.value {
                // An extracted bound never overrides an explicit one.
                if !min.is_explicit() {
                    intent.budget_min = None;
                } else if !max.is_explicit() {
                    intent.budget_max = None;
                }
            }
        }

        if intent.accommodation_type.is_none() {
            intent.accommodation_type = extraction
                .accommodation_type
                .as_deref()
                .map(AccommodationType::parse_lenient)
                .filter(AccommodationType::is_specified)
                .map(|ty| IntentField::extracted(ty, confidence("accommodation_type")));
        }

        if intent.location.is_none() {
            intent.location = extraction
                .location
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|place| {
                    IntentField::extracted(
                        Location::Place(place.to_string()),
                        confidence("location"),
                    )
                });
        }

        intent.bedrooms = extraction
            .bedrooms
            .as_ref()
            .and_then(parse_amount)
            .filter(|b| *b >= 1.0 && *b <= 20.0)
            .map(|b| IntentField::extracted(b.round() as u32, confidence("bedrooms")));

        intent.amenities = extraction
            .amenities
            .into_iter()
            .filter_map(AmenityEntry::into_preference)
            .collect();

        intent.keywords = extraction
            .keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .take(MAX_KEYWORDS)
            .collect();

        intent
    }
}

// ---------------------------------------------------------------------------
// Provider response
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Extraction {
    budget_min: Option<Value>,
    budget_max: Option<Value>,
    accommodation_type: Option<String>,
    location: Option<String>,
    bedrooms: Option<Value>,
    amenities: Vec<AmenityEntry>,
    keywords: Vec<String>,
    confidence: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AmenityEntry {
    Name(String),
    Rated {
        name: String,
        #[serde(default)]
        sentiment: Option<String>,
    },
}

impl AmenityEntry {
    fn into_preference(self) -> Option<AmenityPreference> {
        let (name, sentiment) = match self {
            Self::Name(name) => (name, None),
            Self::Rated { name, sentiment } => (name, sentiment),
        };
        let amenity = name.trim().to_lowercase();
        if amenity.is_empty() {
            return None;
        }
        let sentiment = match sentiment.as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("avoided") || s.eq_ignore_ascii_case("negative") => {
                Sentiment::Avoided
            }
            _ => Sentiment::Wanted,
        };
        Some(AmenityPreference { amenity, sentiment })
    }
}

const EXTRACTION_INSTRUCTION: &str = r#"Extract search constraints from a rental query in India.
Output a JSON object with these fields, using null when the query does not mention one:

{
  "budget_min": number|null,
  "budget_max": number|null,
  "accommodation_type": "apartment|pg|co-living|student-housing|hostel|studio"|null,
  "location": "city or locality"|null,
  "bedrooms": number|null,
  "amenities": [{"name": "...", "sentiment": "wanted|avoided"}],
  "keywords": ["..."],
  "confidence": {"<field>": 0.0-1.0}
}

RULES:
- Budgets are monthly rent in rupees. "under 15k" means budget_max 15000.
- "2bhk" means bedrooms 2 and usually accommodation_type apartment.
- keywords: the important search terms from the query, lowercase.
- confidence: how sure you are about each non-null field.

Output ONLY the JSON object, nothing else."#;

/// Parse the model's output. Handles markdown fences and surrounding prose.
fn parse_extraction(raw: &str) -> Result<Extraction> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json_str = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if end > start => &cleaned[start..=end],
        _ => cleaned,
    };

    serde_json::from_str(json_str).map_err(|e| {
        let preview: String = raw.chars().take(200).collect();
        SearchError::provider("intent", format!("unparseable extraction ({}): {}", e, preview))
    })
}

/// Amounts arrive as numbers or as strings like "15k", "15,000" or "1.5 lakh".
fn parse_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim().to_lowercase().replace([',', '₹'], "");
            let (digits, multiplier) = if let Some(d) = s.strip_suffix("lakh") {
                (d, 100_000.0)
            } else if let Some(d) = s.strip_suffix('l') {
                (d, 100_000.0)
            } else if let Some(d) = s.strip_suffix('k') {
                (d, 1_000.0)
            } else {
                (s.as_str(), 1.0)
            };
            digits.trim().parse::<f64>().ok()? * multiplier
        }
        _ => return None,
    };
    (amount.is_finite() && amount >= 0.0).then_some(amount)
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

pub struct IntentExtractor {
    provider: Arc<dyn GenerativeProvider>,
    timeout: Duration,
}

impl IntentExtractor {
    pub fn new(provider: Arc<dyn GenerativeProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Never fails: provider trouble yields a degraded, explicit-only intent.
    /// The provider call ends at `deadline` at the latest.
    pub async fn extract(&self, query: &Query, deadline: Instant) -> Intent {
        let Some(text) = query.free_text() else {
            return Intent::from_query(query);
        };

        let start = std::time::Instant::now();
        let outcome = with_timeout(
            self.provider.name(),
            time_left(self.timeout, deadline),
            self.provider
                .generate(EXTRACTION_INSTRUCTION, text, EXTRACTION_MAX_TOKENS),
        )
        .await
        .and_then(|raw| parse_extraction(&raw));

        match outcome {
            Ok(extraction) => {
                let intent = Intent::merge(query, extraction);
                tracing::info!(
                    latency_ms = start.elapsed().as_millis() as u64,
                    keywords = ?intent.keywords,
                    filters = ?intent.hard_filters(),
                    "extracted intent"
                );
                intent
            }
            Err(e) => {
                tracing::warn!("intent extraction failed, using explicit fields: {}", e);
                Intent::degraded(query)
            }
        }
    }
}
