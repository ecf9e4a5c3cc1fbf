//! Elasticsearch listing index.
//! Text (multi_match), vector (knn) and geo (geo_distance) query modes
//! against the `<prefix>_real_estate` index.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{HardFilters, IndexHit, IndexQuery, QueryMode, SearchIndex, StoredListing};
use crate::config::IndexConfig;
use crate::error::{Result, SearchError};
use crate::geo;
use crate::types::{AccommodationType, GeoPoint, IndexStats, Listing};

const PROVIDER: &str = "elasticsearch";
const TEXT_FIELDS: &[&str] = &[
    "name^3",
    "description^2",
    "property_type^2",
    "city^2",
    "area",
    "amenities",
];
const CITY_FIELDS: &[&str] = &["geo_location_details.city", "city"];
const STATS_BUCKETS: usize = 20;

pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
    index: String,
    auth: Auth,
    max_retries: u32,
}

enum Auth {
    ApiKey(String),
    Basic { user: String, password: Option<String> },
    None,
}

impl ElasticsearchIndex {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| SearchError::provider(PROVIDER, format!("client build failed: {}", e)))?;

        let auth = match (&config.api_key, &config.user) {
            (Some(key), _) => Auth::ApiKey(key.clone()),
            (None, Some(user)) => Auth::Basic {
                user: user.clone(),
                password: config.password.clone(),
            },
            (None, None) => Auth::None,
        };

        tracing::info!(
            url = %config.base_url(),
            index = %config.listings_index(),
            api_key = matches!(auth, Auth::ApiKey(_)),
            "configured Elasticsearch index"
        );

        Ok(Self {
            client,
            base_url: config.base_url(),
            index: config.listings_index(),
            auth,
            max_retries: config.max_retries,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::ApiKey(key) => builder.header("Authorization", format!("ApiKey {}", key)),
            Auth::Basic { user, password } => builder.basic_auth(user, password.as_ref()),
            Auth::None => builder,
        }
    }

    /// `base_url` extended by `segments`, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let invalid = |detail: String| {
            SearchError::provider(
                PROVIDER,
                format!("invalid base URL {}: {}", self.base_url, detail),
            )
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send with exponential backoff on connection errors and 5xx/429.
    async fn send_json(
        &self,
        method: reqwest::Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<(StatusCode, String)> {
        let mut attempt = 0u32;
        loop {
            let mut builder = self.authorize(self.client.request(method.clone(), url.clone()));
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let message = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.map_err(|e| {
                        SearchError::provider(
                            PROVIDER,
                            format!("failed to read body from {}: {}", url, e),
                        )
                    })?;
                    if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        return Ok((status, text));
                    }
                    format!("HTTP {} from {}", status, url)
                }
                Err(e) if e.is_timeout() => format!("request to {} timed out", url),
                Err(e) if e.is_connect() => format!("failed to connect to {}: {}", url, e),
                Err(e) => {
                    return Err(SearchError::provider(
                        PROVIDER,
                        format!("request to {} failed: {}", url, e),
                    ))
                }
            };

            if attempt >= self.max_retries {
                return Err(SearchError::provider(PROVIDER, message));
            }
            let backoff = Duration::from_millis(200 * 2u64.pow(attempt));
            tracing::debug!(attempt, ?backoff, error = %message, "retrying Elasticsearch request");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let url = self.url(&[self.index.as_str(), endpoint])?;
        let (status, text) = self.send_json(reqwest::Method::POST, url, Some(body)).await?;
        if !status.is_success() {
            return Err(SearchError::provider(
                PROVIDER,
                format!("HTTP {}: {}", status, preview(&text, 300)),
            ));
        }
        parse_json(&text, status)
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn query(&self, request: &IndexQuery) -> Result<Vec<IndexHit>> {
        let body = build_search_body(request);
        tracing::debug!(index = %self.index, body = %body, "Elasticsearch search");
        let response = self.post("_search", &body).await?;
        parse_hits(&response, &request.mode)
    }

    async fn get(&self, listing_id: &str) -> Result<Option<StoredListing>> {
        let url = self.url(&[self.index.as_str(), "_doc", listing_id])?;
        let (status, text) = self.send_json(reqwest::Method::GET, url, None).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SearchError::provider(
                PROVIDER,
                format!("HTTP {}: {}", status, preview(&text, 300)),
            ));
        }
        let doc = parse_json(&text, status)?;
        if doc.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        let id = doc.get("_id").and_then(Value::as_str).unwrap_or(listing_id);
        let source = doc.get("_source").cloned().unwrap_or(Value::Null);
        let embedding = source
            .get("embedding")
            .and_then(|v| serde_json::from_value::<Vec<f32>>(v.clone()).ok());
        Ok(Some(StoredListing {
            listing: listing_from_source(id, &source),
            embedding,
        }))
    }

    async fn stats(&self) -> Result<IndexStats> {
        let count = self.post("_count", &json!({})).await?;
        let total_listings = count.get("count").and_then(Value::as_u64).unwrap_or(0);

        let aggs = self
            .post(
                "_search",
                &json!({
                    "size": 0,
                    "aggs": {
                        "types": {"terms": {"field": "property_type", "size": STATS_BUCKETS}},
                        "cities": {"terms": {"field": "city", "size": STATS_BUCKETS}},
                        "platforms": {"terms": {"field": "platform_name", "size": STATS_BUCKETS}}
                    }
                }),
            )
            .await?;

        let buckets = |name: &str| -> Vec<String> {
            aggs.pointer(&format!("/aggregations/{}/buckets", name))
                .and_then(Value::as_array)
                .map(|b| {
                    b.iter()
                        .filter_map(|bucket| bucket.get("key").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(IndexStats {
            total_listings,
            accommodation_types: buckets("types"),
            cities: buckets("cities"),
            platforms: buckets("platforms"),
        })
    }

    async fn is_ready(&self) -> bool {
        let url = match self.url(&[]) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Elasticsearch ping failed: {}", e);
                return false;
            }
        };
        match self.send_json(reqwest::Method::GET, url, None).await {
            Ok((status, _)) => status.is_success(),
            Err(e) => {
                tracing::warn!("Elasticsearch ping failed: {}", e);
                false
            }
        }
    }
}

/// Any spelling of the city, on the keyword field the index maps and on
/// the flat `city` field older documents carry.
fn city_filter(city: &str) -> Value {
    let should: Vec<Value> = geo::city_aliases(city)
        .iter()
        .flat_map(|alias| {
            CITY_FIELDS.iter().map(move |field| {
                json!({"term": {*field: {"value": alias, "case_insensitive": true}}})
            })
        })
        .collect();
    json!({"bool": {"should": should, "minimum_should_match": 1}})
}

fn filter_clauses(filters: &HardFilters, exclude_ids: &[String]) -> (Vec<Value>, Vec<Value>) {
    let mut filter = Vec::new();
    if let Some(city) = &filters.city {
        filter.push(city_filter(city));
    }
    if let Some(ty) = filters.accommodation_type {
        filter.push(json!({"term": {"property_type": ty.as_str()}}));
    }
    if filters.available_only {
        filter.push(json!({"bool": {
            "should": [
                {"term": {"property_status": "available"}},
                {"bool": {"must_not": {"exists": {"field": "property_status"}}}}
            ],
            "minimum_should_match": 1
        }}));
    }
    let must_not = if exclude_ids.is_empty() {
        Vec::new()
    } else {
        vec![json!({"ids": {"values": exclude_ids}})]
    };
    (filter, must_not)
}

/// Request body for one query mode.
pub(crate) fn build_search_body(request: &IndexQuery) -> Value {
    let (filter, must_not) = filter_clauses(&request.filters, &request.exclude_ids);

    match &request.mode {
        QueryMode::Text { text: Some(text) } => json!({
            "size": request.size,
            "query": {
                "bool": {
                    "should": [
                        {"multi_match": {
                            "query": text,
                            "fields": TEXT_FIELDS,
                            "type": "best_fields",
                            "fuzziness": "AUTO"
                        }},
                        {"match": {"combined_text": {"query": text, "boost": 1.5}}}
                    ],
                    "minimum_should_match": 1,
                    "filter": filter,
                    "must_not": must_not
                }
            }
        }),
        QueryMode::Text { text: None } => json!({
            "size": request.size,
            "query": {
                "bool": {
                    "must": [{"match_all": {}}],
                    "filter": filter,
                    "must_not": must_not
                }
            }
        }),
        QueryMode::Vector { embedding } => {
            let mut knn_filter = filter;
            if !must_not.is_empty() {
                knn_filter.push(json!({"bool": {"must_not": must_not}}));
            }
            json!({
                "size": request.size,
                "knn": {
                    "field": "embedding",
                    "query_vector": embedding,
                    "k": request.size,
                    "num_candidates": request.size.saturating_mul(10).max(10),
                    "filter": knn_filter
                },
                "_source": {"excludes": ["embedding"]}
            })
        }
        QueryMode::Geo { center, radius_km } => {
            let mut geo_filter = filter;
            geo_filter.push(json!({
                "geo_distance": {
                    "distance": format!("{}km", radius_km),
                    "geo_location": {"lat": center.lat, "lon": center.lon}
                }
            }));
            json!({
                "size": request.size,
                "query": {"bool": {"filter": geo_filter, "must_not": must_not}},
                "sort": [{
                    "_geo_distance": {
                        "geo_location": {"lat": center.lat, "lon": center.lon},
                        "order": "asc",
                        "unit": "km"
                    }
                }]
            })
        }
    }
}

#[derive(Deserialize)]
struct SearchResponseBody {
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Value,
    #[serde(default)]
    sort: Vec<Value>,
}

pub(crate) fn parse_hits(response: &Value, mode: &QueryMode) -> Result<Vec<IndexHit>> {
    let body: SearchResponseBody = serde_json::from_value(response.clone())
        .map_err(|e| {
            SearchError::provider(PROVIDER, format!("unexpected search response: {}", e))
        })?;

    Ok(body
        .hits
        .hits
        .into_iter()
        .map(|hit| {
            let score = match mode {
                // Sorted geo queries carry no _score; the sort value is the distance.
                QueryMode::Geo { .. } => hit
                    .sort
                    .first()
                    .and_then(Value::as_f64)
                    .map(geo::proximity_score)
                    .unwrap_or(0.0),
                _ => hit.score.unwrap_or(0.0),
            };
            IndexHit {
                listing: listing_from_source(&hit.id, &hit.source),
                score,
            }
        })
        .collect())
}

/// Map an indexed document onto a listing. Field names follow the index mapping.
pub(crate) fn listing_from_source(id: &str, source: &Value) -> Listing {
    let text = |key: &str| {
        source
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let strings = |key: &str| -> Vec<String> {
        source
            .get(key)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };

    let city = {
        let top = text("city");
        if top.is_empty() {
            source
                .pointer("/geo_location_details/city")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            top
        }
    };

    let coordinates = source.get("geo_location").and_then(|g| {
        let lat = g.get("lat").and_then(Value::as_f64)?;
        let lon = g.get("lon").and_then(Value::as_f64)?;
        Some(GeoPoint::new(lat, lon))
    });

    let listing_id = source
        .get("property_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(id)
        .to_string();

    Listing {
        listing_id,
        name: text("name"),
        description: text("description"),
        accommodation_type: AccommodationType::parse_lenient(&text("property_type")),
        price: source.get("price").and_then(Value::as_f64),
        bedrooms: source
            .get("bedrooms")
            .and_then(Value::as_u64)
            .map(|b| b as u32),
        area_sqft: source.get("area_sqft").and_then(Value::as_f64),
        amenities: strings("amenities"),
        area: text("area"),
        city,
        state: text("state"),
        coordinates,
        platform_name: text("platform_name"),
        status: source
            .get("property_status")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

fn parse_json(body: &str, status: StatusCode) -> Result<Value> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        return Err(SearchError::provider(
            PROVIDER,
            format!(
                "returned HTML instead of JSON (HTTP {}), service may be down: {}",
                status,
                preview(trimmed, 200)
            ),
        ));
    }
    serde_json::from_str(body).map_err(|e| {
        SearchError::provider(
            PROVIDER,
            format!("failed to parse JSON (HTTP {}): {}. Body: {}", status, e, preview(body, 300)),
        )
    })
}

fn preview(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}
