//! Weighted score fusion.
//!
//! Each strategy's scores are min-max normalized over that strategy's own
//! candidates, then blended with the configured weights. A listing missing a
//! strategy contributes 0 for that term. Ordering never depends on hash
//! iteration: identical inputs always give identical output.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config::FusionWeights;
use crate::types::{Candidate, Listing, RankedResult, StrategyKind, StrategyScores};

pub struct FusionRanker {
    weights: FusionWeights,
}

impl FusionRanker {
    pub fn new(weights: FusionWeights) -> Self {
        Self { weights }
    }

    /// Merge per-strategy candidates into at most `limit` ranked results.
    pub fn fuse(&self, candidates: Vec<Candidate>, limit: usize) -> Vec<RankedResult> {
        let mut listings: BTreeMap<String, Listing> = BTreeMap::new();
        // Best raw score per listing, per strategy.
        let mut raw: BTreeMap<String, StrategyScores> = BTreeMap::new();

        for candidate in candidates {
            let id = candidate.listing.listing_id.clone();
            let entry = raw.entry(id.clone()).or_default();
            for kind in StrategyKind::ALL {
                let Some(score) = candidate.scores.get(kind).filter(|s| s.is_finite()) else {
                    continue;
                };
                match entry.get(kind) {
                    Some(existing) if existing >= score => {}
                    _ => entry.set(kind, score),
                }
            }
            listings.entry(id).or_insert(candidate.listing);
        }

        let ranges: BTreeMap<StrategyKind, (f64, f64)> = StrategyKind::ALL
            .iter()
            .filter_map(|kind| {
                let scores = raw.values().filter_map(|s| s.get(*kind));
                let (min, max) = scores.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                    (lo.min(s), hi.max(s))
                });
                (min <= max).then_some((*kind, (min, max)))
            })
            .collect();

        let mut results: Vec<RankedResult> = raw
            .into_iter()
            .filter(|(_, scores)| scores.contributing() > 0)
            .filter_map(|(id, scores)| {
                let listing = listings.remove(&id)?;
                let mut normalized = StrategyScores::default();
                let mut fused_score = 0.0;
                for kind in StrategyKind::ALL {
                    if let (Some(score), Some((min, max))) = (scores.get(kind), ranges.get(&kind)) {
                        let n = normalize(score, *min, *max);
                        normalized.set(kind, n);
                        fused_score += self.weights.weight(kind) * n;
                    }
                }
                Some(RankedResult {
                    candidate: Candidate { listing, scores },
                    normalized,
                    fused_score,
                    rank: 0,
                })
            })
            .filter(|r| r.fused_score >= self.weights.min_fused_score)
            .collect();

        results.sort_by(|a, b| compare_ranked(a.fused_score, a, b.fused_score, b));
        results.truncate(limit);
        assign_ranks(&mut results, |r, rank| r.rank = rank);

        tracing::debug!(
            fused = results.len(),
            top_score = results.first().map(|r| r.fused_score),
            "fusion complete"
        );
        results
    }
}

/// Map `score` into [0, 1]. A strategy whose candidates all share one score
/// maps them to 1.0.
fn normalize(score: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range <= 0.0 {
        return 1.0;
    }
    ((score - min) / range).clamp(0.0, 1.0)
}

/// Score descending, then more contributing strategies, then listing id
/// ascending.
pub(crate) fn compare_ranked(
    a_score: f64,
    a: &RankedResult,
    b_score: f64,
    b: &RankedResult,
) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| b.contributing().cmp(&a.contributing()))
        .then_with(|| a.listing_id().cmp(b.listing_id()))
}

/// Dense 1-based ranks in current order.
pub(crate) fn assign_ranks<T>(items: &mut [T], mut set: impl FnMut(&mut T, usize)) {
    for (i, item) in items.iter_mut().enumerate() {
        set(item, i + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, kind: StrategyKind, score: f64) -> Candidate {
        Candidate::scored(
            Listing {
                listing_id: id.into(),
                ..Listing::default()
            },
            kind,
            score,
        )
    }

    fn ranker() -> FusionRanker {
        FusionRanker::new(FusionWeights::default())
    }

    #[test]
    fn test_consensus_listing_wins() {
        let results = ranker().fuse(
            vec![
                candidate("a", StrategyKind::Lexical, 12.0),
                candidate("b", StrategyKind::Lexical, 6.0),
                candidate("c", StrategyKind::Lexical, 2.0),
                candidate("b", StrategyKind::Vector, 0.9),
                candidate("c", StrategyKind::Vector, 0.3),
            ],
            10,
        );
        let ids: Vec<_> = results.iter().map(|r| r.listing_id()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);

        // b: 0.4 * 0.4 + 0.4 * 1.0
        assert!((results[0].fused_score - 0.56).abs() < 1e-9);
        assert_eq!(results[0].normalized.lexical, Some(0.4));
        assert_eq!(results[0].candidate.scores.lexical, Some(6.0));
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[2].rank, 3);
    }

    #[test]
    fn test_duplicate_within_strategy_keeps_best() {
        let results = ranker().fuse(
            vec![
                candidate("a", StrategyKind::Lexical, 1.0),
                candidate("a", StrategyKind::Lexical, 3.0),
                candidate("b", StrategyKind::Lexical, 2.0),
            ],
            10,
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].listing_id(), "a");
        assert_eq!(results[0].candidate.scores.lexical, Some(3.0));
    }

    #[test]
    fn test_single_candidate_normalizes_to_one() {
        let results = ranker().fuse(vec![candidate("solo", StrategyKind::Geo, 0.2)], 10);
        assert_eq!(results[0].normalized.geo, Some(1.0));
        assert!((results[0].fused_score - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_on_contributors_then_id() {
        let results = ranker().fuse(
            vec![
                // "z" gets 0.4 from lexical and 0 from vector; "m" and "a" get 0.4 from vector.
                candidate("z", StrategyKind::Lexical, 5.0),
                candidate("z", StrategyKind::Vector, 0.1),
                candidate("m", StrategyKind::Vector, 0.8),
                candidate("a", StrategyKind::Vector, 0.8),
            ],
            10,
        );
        let ids: Vec<_> = results.iter().map(|r| r.listing_id()).collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_truncates_to_limit() {
        let candidates = (0..20)
            .map(|i| candidate(&format!("l{:02}", i), StrategyKind::Lexical, i as f64))
            .collect();
        let results = ranker().fuse(candidates, 5);
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].listing_id(), "l19");
        assert_eq!(results[4].rank, 5);
    }

    #[test]
    fn test_min_fused_score_cutoff() {
        let ranker = FusionRanker::new(FusionWeights {
            min_fused_score: 0.3,
            ..FusionWeights::default()
        });
        let results = ranker.fuse(
            vec![
                candidate("hi", StrategyKind::Lexical, 10.0),
                candidate("lo", StrategyKind::Lexical, 1.0),
            ],
            10,
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].listing_id(), "hi");
    }

    #[test]
    fn test_non_finite_scores_ignored() {
        let results = ranker().fuse(
            vec![
                candidate("nan", StrategyKind::Lexical, f64::NAN),
                candidate("ok", StrategyKind::Lexical, 1.0),
            ],
            10,
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].listing_id(), "ok");
    }

    #[test]
    fn test_empty_input() {
        assert!(ranker().fuse(Vec::new(), 10).is_empty());
    }
}
