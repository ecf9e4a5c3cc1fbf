//! Constraint-aware re-ranking of fused results.
//!
//! A pure function of the fused list and the explicit constraints: each
//! violated constraint multiplies the fused score by its penalty factor.

use std::cmp::Ordering;

use crate::config::PenaltyConfig;
use crate::fusion::{assign_ranks, compare_ranked};
use crate::geo;
use crate::query::Constraints;
use crate::types::{
    ConstraintCheck, ConstraintKind, ConstraintStatus, Listing, Location, RankedResult,
    Recommendation,
};

pub struct RecommendationScorer {
    config: PenaltyConfig,
}

impl RecommendationScorer {
    pub fn new(config: PenaltyConfig) -> Self {
        Self { config }
    }

    pub fn score(
        &self,
        results: Vec<RankedResult>,
        constraints: &Constraints,
        limit: usize,
    ) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> = results
            .into_iter()
            .map(|result| {
                let checks = self.check(result.listing(), constraints);
                let multiplier: f64 = checks
                    .iter()
                    .filter(|c| c.status == ConstraintStatus::Violated)
                    .map(|c| self.penalty(c.constraint))
                    .product();
                Recommendation {
                    recommendation_score: result.fused_score * multiplier,
                    result,
                    constraints: checks,
                }
            })
            .collect();

        recommendations.sort_by(compare_recommendations);
        recommendations.truncate(limit);
        assign_ranks(&mut recommendations, |r, rank| r.result.rank = rank);
        recommendations
    }

    fn penalty(&self, kind: ConstraintKind) -> f64 {
        match kind {
            ConstraintKind::Budget => self.config.budget_penalty,
            ConstraintKind::AccommodationType => self.config.type_penalty,
            ConstraintKind::Location => self.config.location_penalty,
        }
    }

    /// One check per constraint the caller actually set.
    fn check(&self, listing: &Listing, constraints: &Constraints) -> Vec<ConstraintCheck> {
        let mut checks = Vec::with_capacity(3);

        if constraints.has_budget() {
            checks.push(ConstraintCheck {
                constraint: ConstraintKind::Budget,
                status: budget_status(listing.price, constraints),
            });
        }

        if constraints.accommodation_type.is_specified() {
            let status = if listing.accommodation_type == constraints.accommodation_type {
                ConstraintStatus::Satisfied
            } else {
                ConstraintStatus::Violated
            };
            checks.push(ConstraintCheck {
                constraint: ConstraintKind::AccommodationType,
                status,
            });
        }

        if let Some(location) = &constraints.location {
            checks.push(ConstraintCheck {
                constraint: ConstraintKind::Location,
                status: self.location_status(listing, location),
            });
        }

        checks
    }

    fn location_status(&self, listing: &Listing, location: &Location) -> ConstraintStatus {
        match location {
            Location::Point(point) => match listing.coordinates {
                None => ConstraintStatus::Partial,
                Some(coords) => {
                    let distance = geo::haversine_km(*point, coords);
                    if distance <= self.config.location_radius_km {
                        ConstraintStatus::Satisfied
                    } else if distance <= 2.0 * self.config.location_radius_km {
                        ConstraintStatus::Partial
                    } else {
                        ConstraintStatus::Violated
                    }
                }
            },
            Location::Place(place) => place_status(listing, place),
        }
    }
}

fn budget_status(price: Option<f64>, constraints: &Constraints) -> ConstraintStatus {
    let Some(price) = price else {
        return ConstraintStatus::Partial;
    };
    let above_min = constraints.budget_min.map_or(true, |min| price >= min);
    let below_max = constraints.budget_max.map_or(true, |max| price <= max);
    if above_min && below_max {
        ConstraintStatus::Satisfied
    } else {
        ConstraintStatus::Violated
    }
}

/// City match satisfies; a matching locality or state is partial.
fn place_status(listing: &Listing, place: &str) -> ConstraintStatus {
    let place = place.to_lowercase();
    let mentions = |field: &str| {
        let field = field.trim().to_lowercase();
        !field.is_empty() && place.contains(&field)
    };

    let same_city = match (geo::canonical_city(&place), geo::canonical_city(&listing.city)) {
        (Some(wanted), Some(actual)) => wanted == actual,
        _ => mentions(&listing.city),
    };

    if same_city {
        ConstraintStatus::Satisfied
    } else if mentions(&listing.area) || mentions(&listing.state) {
        ConstraintStatus::Partial
    } else {
        ConstraintStatus::Violated
    }
}

/// Score descending, then fewer violations, then the fusion tie-break.
fn compare_recommendations(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.recommendation_score
        .total_cmp(&a.recommendation_score)
        .then_with(|| a.violations().cmp(&b.violations()))
        .then_with(|| {
            compare_ranked(
                a.recommendation_score,
                &a.result,
                b.recommendation_score,
                &b.result,
            )
        })
}
