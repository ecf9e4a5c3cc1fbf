use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::query::Query;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case", from = "String")]
pub enum AccommodationType {
    Apartment,
    Pg,
    CoLiving,
    StudentHousing,
    Hostel,
    Studio,
    #[default]
    Unspecified,
}

impl AccommodationType {
    /// Lenient parse: unknown strings map to `Unspecified` instead of failing.
    pub fn parse_lenient(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();

        match normalized.as_str() {
            "apartment" | "flat" | "unit" | "apartments" | "flats" => Self::Apartment,
            "pg" | "paying-guest" | "p.g." | "p.g" => Self::Pg,
            "co-living" | "coliving" | "co-live" => Self::CoLiving,
            "student-housing" | "student-accommodation" | "student-hostel" => {
                Self::StudentHousing
            }
            "hostel" | "dorm" | "dormitory" => Self::Hostel,
            "studio" | "studio-apartment" | "1rk" | "rk" => Self::Studio,
            _ => Self::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apartment => "apartment",
            Self::Pg => "pg",
            Self::CoLiving => "co-living",
            Self::StudentHousing => "student-housing",
            Self::Hostel => "hostel",
            Self::Studio => "studio",
            Self::Unspecified => "unspecified",
        }
    }

    pub fn is_specified(&self) -> bool {
        !matches!(self, Self::Unspecified)
    }
}

impl From<String> for AccommodationType {
    fn from(raw: String) -> Self {
        Self::parse_lenient(&raw)
    }
}

impl fmt::Display for AccommodationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which retrieval strategies a query activates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum SearchType {
    Keyword,
    Semantic,
    #[default]
    Hybrid,
    Geo,
}

impl SearchType {
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "keyword" | "lexical" | "text" => Self::Keyword,
            "semantic" | "vector" => Self::Semantic,
            "geo" | "nearby" | "location" => Self::Geo,
            _ => Self::Hybrid,
        }
    }

    pub fn strategies(&self) -> &'static [StrategyKind] {
        match self {
            Self::Keyword => &[StrategyKind::Lexical],
            Self::Semantic => &[StrategyKind::Vector],
            Self::Geo => &[StrategyKind::Geo],
            Self::Hybrid => &[StrategyKind::Lexical, StrategyKind::Vector, StrategyKind::Geo],
        }
    }
}

impl From<String> for SearchType {
    fn from(raw: String) -> Self {
        Self::parse_lenient(&raw)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Place(String),
    Point(GeoPoint),
}

impl Location {
    pub fn place_name(&self) -> Option<&str> {
        match self {
            Self::Place(name) => Some(name.as_str()),
            Self::Point(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Place(name) => f.write_str(name),
            Self::Point(p) => write!(f, "{:.5},{:.5}", p.lat, p.lon),
        }
    }
}

/// Listing attributes needed for filtering, scoring and display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Listing {
    pub listing_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub accommodation_type: AccommodationType,
    /// Monthly rent.
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub area_sqft: Option<f64>,
    #[serde(default)]
    pub amenities: Vec<String>,
    /// Locality within the city.
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    #[serde(default)]
    pub platform_name: String,
    /// Listing status such as "available" or "rented".
    #[serde(default)]
    pub status: Option<String>,
}

impl Listing {
    /// Listings with no recorded status count as available.
    pub fn is_available(&self) -> bool {
        self.status
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case("available"))
    }

    /// Text used for lexical matching and offline embeddings.
    pub fn combined_text(&self) -> String {
        let mut parts = vec![
            self.name.as_str(),
            self.description.as_str(),
            self.accommodation_type.as_str(),
            self.area.as_str(),
            self.city.as_str(),
            self.state.as_str(),
        ];
        parts.extend(self.amenities.iter().map(String::as_str));
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Lexical,
    Vector,
    Geo,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [Self::Lexical, Self::Vector, Self::Geo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
            Self::Geo => "geo",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One optional score per retrieval strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct StrategyScores {
    pub lexical: Option<f64>,
    pub vector: Option<f64>,
    pub geo: Option<f64>,
}

impl StrategyScores {
    pub fn get(&self, kind: StrategyKind) -> Option<f64> {
        match kind {
            StrategyKind::Lexical => self.lexical,
            StrategyKind::Vector => self.vector,
            StrategyKind::Geo => self.geo,
        }
    }

    pub fn set(&mut self, kind: StrategyKind, score: f64) {
        match kind {
            StrategyKind::Lexical => self.lexical = Some(score),
            StrategyKind::Vector => self.vector = Some(score),
            StrategyKind::Geo => self.geo = Some(score),
        }
    }

    /// Number of strategies that produced a score.
    pub fn contributing(&self) -> usize {
        StrategyKind::ALL
            .iter()
            .filter(|kind| self.get(**kind).is_some())
            .count()
    }
}

/// A listing scored by one or more retrieval strategies, pre-fusion.
/// Identity is `listing.listing_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub listing: Listing,
    pub scores: StrategyScores,
}

impl Candidate {
    pub fn scored(listing: Listing, kind: StrategyKind, score: f64) -> Self {
        let mut scores = StrategyScores::default();
        scores.set(kind, score);
        Self { listing, scores }
    }

    pub fn listing_id(&self) -> &str {
        &self.listing.listing_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedResult {
    pub candidate: Candidate,
    /// Per-strategy scores after min-max normalization, before weighting.
    pub normalized: StrategyScores,
    pub fused_score: f64,
    /// 1-based, dense.
    pub rank: usize,
}

impl RankedResult {
    pub fn listing(&self) -> &Listing {
        &self.candidate.listing
    }

    pub fn listing_id(&self) -> &str {
        self.candidate.listing_id()
    }

    pub fn contributing(&self) -> usize {
        self.candidate.scores.contributing()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Budget,
    AccommodationType,
    Location,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::AccommodationType => "accommodation_type",
            Self::Location => "location",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintStatus {
    Satisfied,
    Partial,
    Violated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintCheck {
    pub constraint: ConstraintKind,
    pub status: ConstraintStatus,
}

impl fmt::Display for ConstraintCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            ConstraintStatus::Satisfied => "satisfied",
            ConstraintStatus::Partial => "partial",
            ConstraintStatus::Violated => "violated",
        };
        write!(f, "{}: {}", self.constraint.as_str(), status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub result: RankedResult,
    pub recommendation_score: f64,
    pub constraints: Vec<ConstraintCheck>,
}

impl Recommendation {
    pub fn listing(&self) -> &Listing {
        self.result.listing()
    }

    pub fn violations(&self) -> usize {
        self.constraints
            .iter()
            .filter(|c| c.status == ConstraintStatus::Violated)
            .count()
    }
}

/// Components whose failure degrades a response without failing it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Intent,
    Lexical,
    Vector,
    Geo,
    Summaries,
}

impl From<StrategyKind> for Subsystem {
    fn from(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Lexical => Self::Lexical,
            StrategyKind::Vector => Self::Vector,
            StrategyKind::Geo => Self::Geo,
        }
    }
}

/// A ranked item plus its optional AI summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assembled<T> {
    #[serde(flatten)]
    pub item: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T> {
    pub request_id: Uuid,
    pub query: Query,
    pub results: Vec<Assembled<T>>,
    pub degraded: bool,
    pub unavailable: BTreeSet<Subsystem>,
}

pub type SearchResponse = Response<RankedResult>;
pub type RecommendResponse = Response<Recommendation>;

/// Listings most similar to one known listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarResponse {
    pub request_id: Uuid,
    pub listing_id: String,
    pub results: Vec<RankedResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexStats {
    pub total_listings: u64,
    pub accommodation_types: Vec<String>,
    pub cities: Vec<String>,
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub index: bool,
    pub embeddings: bool,
    pub generation: bool,
    pub timestamp: String,
}
