//! Final response assembly with optional AI summaries.

use futures::future::join_all;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::AssemblerConfig;
use crate::error::{time_left, with_timeout};
use crate::providers::GenerativeProvider;
use crate::types::{Assembled, Listing, RankedResult, Recommendation};

/// Anything the assembler can summarize.
pub trait HasListing {
    fn listing(&self) -> &Listing;
}

impl HasListing for RankedResult {
    fn listing(&self) -> &Listing {
        RankedResult::listing(self)
    }
}

impl HasListing for Recommendation {
    fn listing(&self) -> &Listing {
        Recommendation::listing(self)
    }
}

const SUMMARY_INSTRUCTION: &str = "You write short summaries of rental listings for someone \
searching for a place to live. In two sentences, say what the place is, where it is, what it \
costs and why it fits the search. Plain text only, no markdown.";

pub struct ResultAssembler {
    provider: Arc<dyn GenerativeProvider>,
    config: AssemblerConfig,
    timeout: Duration,
}

/// Assembled entries plus whether any summary was lost.
pub struct Assembly<T> {
    pub results: Vec<Assembled<T>>,
    pub summaries_failed: bool,
}

impl ResultAssembler {
    pub fn new(
        provider: Arc<dyn GenerativeProvider>,
        config: AssemblerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            config,
            timeout,
        }
    }

    /// Summarize the first `summary_top_n` entries concurrently. Entries keep
    /// their order; a failed summary leaves that entry without one.
    pub async fn assemble<T: HasListing>(
        &self,
        items: Vec<T>,
        search_text: Option<&str>,
        deadline: Instant,
    ) -> Assembly<T> {
        let top_n = self.config.summary_top_n.min(items.len());

        let summaries = join_all(
            items[..top_n]
                .iter()
                .map(|item| self.summarize(item.listing(), search_text, deadline)),
        )
        .await;

        let summaries_failed = summaries.iter().any(Option::is_none);
        if summaries_failed {
            let failed = summaries.iter().filter(|s| s.is_none()).count();
            tracing::warn!(failed, requested = top_n, "some listing summaries are unavailable");
        }

        let results = items
            .into_iter()
            .zip(summaries.into_iter().chain(std::iter::repeat(None)))
            .map(|(item, summary)| Assembled { item, summary })
            .collect();

        Assembly {
            results,
            summaries_failed,
        }
    }

    async fn summarize(
        &self,
        listing: &Listing,
        search_text: Option<&str>,
        deadline: Instant,
    ) -> Option<String> {
        let budget = time_left(self.timeout, deadline);
        if budget.is_zero() {
            tracing::debug!(
                listing_id = %listing.listing_id,
                "request deadline passed, no summary"
            );
            return None;
        }
        let prompt = describe(listing, search_text);
        match with_timeout(
            self.provider.name(),
            budget,
            self.provider
                .generate(SUMMARY_INSTRUCTION, &prompt, self.config.summary_max_tokens),
        )
        .await
        {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                tracing::debug!(listing_id = %listing.listing_id, "empty summary");
                None
            }
            Err(e) => {
                tracing::debug!(listing_id = %listing.listing_id, "summary failed: {}", e);
                None
            }
        }
    }
}

fn describe(listing: &Listing, search_text: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(text) = search_text {
        let _ = writeln!(out, "Search: {}", text);
    }
    let _ = writeln!(out, "Name: {}", listing.name);
    let _ = writeln!(out, "Type: {}", listing.accommodation_type);
    if let Some(price) = listing.price {
        let _ = writeln!(out, "Rent: {:.0} per month", price);
    }
    if let Some(bedrooms) = listing.bedrooms {
        let _ = writeln!(out, "Bedrooms: {}", bedrooms);
    }
    let place: Vec<&str> = [listing.area.as_str(), listing.city.as_str(), listing.state.as_str()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    if !place.is_empty() {
        let _ = writeln!(out, "Location: {}", place.join(", "));
    }
    if !listing.amenities.is_empty() {
        let _ = writeln!(out, "Amenities: {}", listing.amenities.join(", "));
    }
    if !listing.description.is_empty() {
        let description: String = listing.description.chars().take(600).collect();
        let _ = writeln!(out, "Description: {}", description);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SearchError};
    use crate::types::{Candidate, StrategyKind, StrategyScores};
    use async_trait::async_trait;

    /// Fails for listings whose name contains "broken".
    struct Picky;

    #[async_trait]
    impl GenerativeProvider for Picky {
        fn name(&self) -> &'static str {
            "picky"
        }

        async fn generate(&self, _: &str, text: &str, _: usize) -> Result<String> {
            if text.contains("broken") {
                return Err(SearchError::provider("picky", "refused"));
            }
            let name = text
                .lines()
                .find_map(|l| l.strip_prefix("Name: "))
                .unwrap_or_default();
            Ok(format!("  Summary of {}  ", name))
        }

        async fn is_ready(&self) -> bool {
            true
        }
    }

    fn ranked(name: &str, rank: usize) -> RankedResult {
        RankedResult {
            candidate: Candidate::scored(
                Listing {
                    listing_id: format!("id-{}", rank),
                    name: name.into(),
                    ..Listing::default()
                },
                StrategyKind::Lexical,
                1.0,
            ),
            normalized: StrategyScores::default(),
            fused_score: 1.0 / rank as f64,
            rank,
        }
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn assembler(top_n: usize) -> ResultAssembler {
        ResultAssembler::new(
            Arc::new(Picky),
            AssemblerConfig {
                summary_top_n: top_n,
                ..AssemblerConfig::default()
            },
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_partial_summary_failure_keeps_entries() {
        let items = vec![ranked("Sea View", 1), ranked("broken flat", 2), ranked("Hill Top", 3)];
        let assembly = assembler(5).assemble(items, Some("2bhk"), later()).await;

        assert!(assembly.summaries_failed);
        assert_eq!(assembly.results.len(), 3);
        assert_eq!(assembly.results[0].summary.as_deref(), Some("Summary of Sea View"));
        assert!(assembly.results[1].summary.is_none());
        assert_eq!(assembly.results[1].item.rank, 2);
        assert_eq!(assembly.results[2].summary.as_deref(), Some("Summary of Hill Top"));
    }

    #[tokio::test]
    async fn test_only_top_n_summarized() {
        let items = (1..=4).map(|i| ranked(&format!("Place {}", i), i)).collect();
        let assembly = assembler(2).assemble(items, None, later()).await;

        assert!(!assembly.summaries_failed);
        let summarized: Vec<bool> = assembly.results.iter().map(|r| r.summary.is_some()).collect();
        assert_eq!(summarized, vec![true, true, false, false]);
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_summaries() {
        let items = vec![ranked("Sea View", 1)];
        let assembly = assembler(5)
            .assemble(items, None, Instant::now() - Duration::from_millis(1))
            .await;

        assert_eq!(assembly.results.len(), 1);
        assert!(assembly.results[0].summary.is_none());
        assert!(assembly.summaries_failed);
    }

    #[test]
    fn test_describe_includes_known_fields() {
        let listing = Listing {
            name: "Green PG".into(),
            price: Some(9500.0),
            area: "HSR Layout".into(),
            city: "Bangalore".into(),
            amenities: vec!["wifi".into(), "meals".into()],
            ..Listing::default()
        };
        let text = describe(&listing, Some("pg near hsr"));
        assert!(text.contains("Search: pg near hsr"));
        assert!(text.contains("Rent: 9500 per month"));
        assert!(text.contains("Location: HSR Layout, Bangalore"));
        assert!(text.contains("Amenities: wifi, meals"));
        assert!(!text.contains("Bedrooms"));
    }
}
