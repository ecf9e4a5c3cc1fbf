use std::collections::BTreeSet;

use dwell_search::config::FusionWeights;
use dwell_search::fusion::FusionRanker;
use dwell_search::types::{Candidate, Listing, StrategyKind};
use proptest::prelude::*;

fn arb_kind() -> impl Strategy<Value = StrategyKind> {
    prop_oneof![
        Just(StrategyKind::Lexical),
        Just(StrategyKind::Vector),
        Just(StrategyKind::Geo),
    ]
}

/// Candidates drawn from a small id space so strategies overlap often.
fn arb_candidates() -> impl Strategy<Value = Vec<Candidate>> {
    prop::collection::vec((arb_kind(), 0u8..12, -50.0f64..50.0), 0..40).prop_map(|raw| {
        raw.into_iter()
            .map(|(kind, id, score)| {
                let listing = Listing {
                    listing_id: format!("listing-{:02}", id),
                    ..Listing::default()
                };
                Candidate::scored(listing, kind, score)
            })
            .collect()
    })
}

fn ranker() -> FusionRanker {
    FusionRanker::new(FusionWeights::default())
}

proptest! {
    #[test]
    fn output_is_bounded_ranked_and_sorted(candidates in arb_candidates(), limit in 1usize..15) {
        let results = ranker().fuse(candidates, limit);

        prop_assert!(results.len() <= limit);
        for (i, result) in results.iter().enumerate() {
            prop_assert_eq!(result.rank, i + 1);
            prop_assert!(result.fused_score >= 0.0);
            prop_assert!(result.fused_score <= 1.0 + 1e-9);
        }
        for pair in results.windows(2) {
            prop_assert!(
                pair[0].fused_score >= pair[1].fused_score,
                "scores increase at rank {}: {} < {}",
                pair[1].rank,
                pair[0].fused_score,
                pair[1].fused_score
            );
        }
    }

    #[test]
    fn each_listing_appears_once(candidates in arb_candidates()) {
        let distinct: BTreeSet<String> = candidates
            .iter()
            .map(|c| c.listing_id().to_string())
            .collect();
        let results = ranker().fuse(candidates, 100);

        let seen: BTreeSet<&str> = results.iter().map(|r| r.listing_id()).collect();
        prop_assert_eq!(seen.len(), results.len());
        prop_assert_eq!(results.len(), distinct.len());
    }

    #[test]
    fn fusion_is_order_independent(
        (candidates, shuffled) in arb_candidates()
            .prop_flat_map(|c| (Just(c.clone()), Just(c).prop_shuffle()))
    ) {
        let a = ranker().fuse(candidates.clone(), 10);
        let b = ranker().fuse(candidates, 10);
        let c = ranker().fuse(shuffled, 10);
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&a, &c);
    }

    #[test]
    fn multi_strategy_score_is_weighted_sum(candidates in arb_candidates()) {
        let weights = FusionWeights::default();
        let results = ranker().fuse(candidates, 100);

        for result in &results {
            let expected: f64 = StrategyKind::ALL
                .iter()
                .filter_map(|kind| result.normalized.get(*kind).map(|n| n * weights.weight(*kind)))
                .sum();
            prop_assert!((result.fused_score - expected).abs() < 1e-9);
            prop_assert_eq!(
                result.normalized.contributing(),
                result.candidate.scores.contributing()
            );
        }
    }
}
