//! Query normalization.
//!
//! Turns raw user input into an immutable [`Query`]. Contradictory budgets
//! are rejected; everything else that is malformed degrades to a default.
//! No network or index access happens here.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::config::QueryConfig;
use crate::error::{Result, SearchError};
use crate::types::{AccommodationType, GeoPoint, Location, SearchType};

static COORDINATES_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^\s*(-?\d{1,2}(?:\.\d+)?)\s*,\s*(-?\d{1,3}(?:\.\d+)?)\s*$")
        .expect("coordinates regex is valid")
});

const MAX_FREE_TEXT_CHARS: usize = 512;

/// User-supplied query fields before validation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RawQuery {
    #[serde(alias = "query")]
    pub text: Option<String>,
    pub location: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub accommodation_type: Option<String>,
    pub search_type: Option<String>,
    pub limit: Option<i64>,
}

impl RawQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// A validated query. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    free_text: Option<String>,
    location: Option<Location>,
    budget_min: Option<f64>,
    budget_max: Option<f64>,
    accommodation_type: AccommodationType,
    search_type: SearchType,
    limit: usize,
}

impl Query {
    pub fn free_text(&self) -> Option<&str> {
        self.free_text.as_deref()
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn budget_min(&self) -> Option<f64> {
        self.budget_min
    }

    pub fn budget_max(&self) -> Option<f64> {
        self.budget_max
    }

    pub fn accommodation_type(&self) -> AccommodationType {
        self.accommodation_type
    }

    pub fn search_type(&self) -> SearchType {
        self.search_type
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The explicit constraints a recommendation is scored against.
    pub fn constraints(&self) -> Constraints {
        Constraints {
            budget_min: self.budget_min,
            budget_max: self.budget_max,
            accommodation_type: self.accommodation_type,
            location: self.location.clone(),
        }
    }

    fn has_filters(&self) -> bool {
        self.location.is_some()
            || self.budget_min.is_some()
            || self.budget_max.is_some()
            || self.accommodation_type.is_specified()
    }
}

/// Explicit budget, type and location constraints, independent of free text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Constraints {
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub accommodation_type: AccommodationType,
    pub location: Option<Location>,
}

impl Constraints {
    pub fn has_budget(&self) -> bool {
        self.budget_min.is_some() || self.budget_max.is_some()
    }
}

pub struct QueryNormalizer {
    config: QueryConfig,
}

impl QueryNormalizer {
    pub fn new(config: QueryConfig) -> Self {
        Self { config }
    }

    pub fn normalize(&self, raw: &RawQuery) -> Result<Query> {
        let budget_min = validate_budget("budget_min", raw.budget_min)?;
        let budget_max = validate_budget("budget_max", raw.budget_max)?;
        if let (Some(min), Some(max)) = (budget_min, budget_max) {
            if min > max {
                return Err(SearchError::InvalidQuery(format!(
                    "budget_min ({}) must not exceed budget_max ({})",
                    min, max
                )));
            }
        }

        let query = Query {
            free_text: raw.text.as_deref().and_then(normalize_text),
            location: normalize_location(raw),
            budget_min,
            budget_max,
            accommodation_type: raw
                .accommodation_type
                .as_deref()
                .map(AccommodationType::parse_lenient)
                .unwrap_or_default(),
            search_type: raw
                .search_type
                .as_deref()
                .map(SearchType::parse_lenient)
                .unwrap_or_default(),
            limit: self.clamp_limit(raw.limit),
        };

        if query.free_text.is_none() && !query.has_filters() {
            return Err(SearchError::InvalidQuery(
                "query has neither free text nor filters".to_string(),
            ));
        }

        Ok(query)
    }

    /// Default a missing or non-positive limit, cap the rest.
    pub fn clamp_limit(&self, limit: Option<i64>) -> usize {
        match limit {
            Some(n) if n > 0 => (n as usize).min(self.config.max_limit),
            _ => self.config.default_limit.min(self.config.max_limit),
        }
    }
}

fn validate_budget(field: &str, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        None => Ok(None),
        Some(v) if !v.is_finite() => Err(SearchError::InvalidQuery(format!(
            "{} must be a finite number",
            field
        ))),
        Some(v) if v < 0.0 => Err(SearchError::InvalidQuery(format!(
            "{} must be non-negative, got {}",
            field, v
        ))),
        Some(v) => Ok(Some(v)),
    }
}

fn normalize_text(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_FREE_TEXT_CHARS).collect())
}

fn normalize_location(raw: &RawQuery) -> Option<Location> {
    if let (Some(lat), Some(lon)) = (raw.lat, raw.lon) {
        let point = GeoPoint::new(lat, lon);
        if point.is_valid() {
            return Some(Location::Point(point));
        }
        tracing::debug!(lat, lon, "ignoring out-of-range coordinates");
    }

    let text = raw.location.as_deref()?.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = COORDINATES_RE.captures(text) {
        let lat = caps[1].parse::<f64>().ok();
        let lon = caps[2].parse::<f64>().ok();
        if let (Some(lat), Some(lon)) = (lat, lon) {
            let point = GeoPoint::new(lat, lon);
            if point.is_valid() {
                return Some(Location::Point(point));
            }
        }
        return None;
    }

    Some(Location::Place(text.split_whitespace().collect::<Vec<_>>().join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> QueryNormalizer {
        QueryNormalizer::new(QueryConfig::default())
    }

    #[test]
    fn test_defaults_applied() {
        let query = normalizer()
            .normalize(&RawQuery::text("  2bhk   apartment mumbai "))
            .unwrap();
        assert_eq!(query.free_text(), Some("2bhk apartment mumbai"));
        assert_eq!(query.limit(), 10);
        assert_eq!(query.search_type(), SearchType::Hybrid);
        assert_eq!(query.accommodation_type(), AccommodationType::Unspecified);
    }

    #[test]
    fn test_limit_clamped_and_defaulted() {
        let n = normalizer();
        let mut raw = RawQuery::text("studio");
        raw.limit = Some(500);
        assert_eq!(n.normalize(&raw).unwrap().limit(), 50);
        raw.limit = Some(0);
        assert_eq!(n.normalize(&raw).unwrap().limit(), 10);
        raw.limit = Some(-3);
        assert_eq!(n.normalize(&raw).unwrap().limit(), 10);
        raw.limit = Some(7);
        assert_eq!(n.normalize(&raw).unwrap().limit(), 7);
    }

    #[test]
    fn test_budget_order_enforced() {
        let raw = RawQuery {
            budget_min: Some(20_000.0),
            budget_max: Some(8_000.0),
            location: Some("pune".into()),
            ..RawQuery::default()
        };
        assert!(matches!(
            normalizer().normalize(&raw),
            Err(SearchError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_negative_budget_rejected() {
        let raw = RawQuery {
            budget_max: Some(-1.0),
            ..RawQuery::text("pg")
        };
        assert!(normalizer().normalize(&raw).is_err());
    }

    #[test]
    fn test_equal_budget_bounds_accepted() {
        let raw = RawQuery {
            budget_min: Some(15_000.0),
            budget_max: Some(15_000.0),
            ..RawQuery::text("pg")
        };
        assert!(normalizer().normalize(&raw).is_ok());
    }

    #[test]
    fn test_unknown_type_degrades() {
        let raw = RawQuery {
            accommodation_type: Some("igloo".into()),
            ..RawQuery::text("cheap stay")
        };
        let query = normalizer().normalize(&raw).unwrap();
        assert_eq!(query.accommodation_type(), AccommodationType::Unspecified);
    }

    #[test]
    fn test_location_coordinates_parsed() {
        let raw = RawQuery {
            location: Some("12.9352, 77.6245".into()),
            ..RawQuery::default()
        };
        let query = normalizer().normalize(&raw).unwrap();
        assert_eq!(
            query.location(),
            Some(&Location::Point(GeoPoint::new(12.9352, 77.6245)))
        );
    }

    #[test]
    fn test_location_place_kept() {
        let raw = RawQuery {
            location: Some(" Koramangala,  Bangalore ".into()),
            ..RawQuery::default()
        };
        let query = normalizer().normalize(&raw).unwrap();
        assert_eq!(
            query.location(),
            Some(&Location::Place("Koramangala, Bangalore".into()))
        );
    }

    #[test]
    fn test_explicit_lat_lon_wins() {
        let raw = RawQuery {
            location: Some("Delhi".into()),
            lat: Some(19.07),
            lon: Some(72.87),
            ..RawQuery::default()
        };
        let query = normalizer().normalize(&raw).unwrap();
        assert!(matches!(query.location(), Some(Location::Point(_))));
    }

    #[test]
    fn test_empty_query_rejected() {
        let raw = RawQuery::text("   ");
        assert!(matches!(
            normalizer().normalize(&raw),
            Err(SearchError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_filters_only_query_accepted() {
        let raw = RawQuery {
            budget_min: Some(8_000.0),
            budget_max: Some(20_000.0),
            location: Some("bangalore".into()),
            accommodation_type: Some("pg".into()),
            ..RawQuery::default()
        };
        let query = normalizer().normalize(&raw).unwrap();
        let constraints = query.constraints();
        assert!(constraints.has_budget());
        assert_eq!(constraints.accommodation_type, AccommodationType::Pg);
        assert!(query.free_text().is_none());
    }

    #[test]
    fn test_raw_query_accepts_query_alias() {
        let raw: RawQuery =
            serde_json::from_str(r#"{"query": "hostel near college", "limit": 5}"#).unwrap();
        assert_eq!(raw.text.as_deref(), Some("hostel near college"));
        assert_eq!(raw.limit, Some(5));
    }
}
