use rand::seq::SliceRandom;

use crate::models::assignment::ScoreBreakdown;
use crate::models::courier::Courier;

const DISTANCE_WEIGHT: f64 = 5.0;
const ETA_WEIGHT: f64 = 5.0;
const RATING_WEIGHT: f64 = 2.0;
const BUSY_PENALTY_WEIGHT: f64 = 3.0;

/// A courier that survived filtering, with everything needed to make an offer.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub courier: Courier,
    pub distance_km: f64,
    pub eta_min: f64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Higher is better.
pub fn score(distance_km: f64, eta_min: f64, rating: f64, busy_penalty_count: u32) -> f64 {
    weighted_score(&breakdown(distance_km, eta_min, rating, busy_penalty_count))
}

pub fn score_courier(courier: &Courier, distance_km: f64, eta_min: f64) -> (f64, ScoreBreakdown) {
    let breakdown = breakdown(distance_km, eta_min, courier.rating, courier.active_orders);
    (weighted_score(&breakdown), breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    breakdown.distance_score + breakdown.eta_score + breakdown.rating_score
        - breakdown.busy_penalty
}

fn breakdown(distance_km: f64, eta_min: f64, rating: f64, busy_penalty_count: u32) -> ScoreBreakdown {
    ScoreBreakdown {
        distance_score: DISTANCE_WEIGHT * (1.0 / (1.0 + distance_km)),
        eta_score: ETA_WEIGHT * (1.0 / (1.0 + eta_min)),
        rating_score: RATING_WEIGHT * rating,
        busy_penalty: BUSY_PENALTY_WEIGHT * f64::from(busy_penalty_count),
    }
}

/// Descending by score. The sort is stable, so equal scores keep the order
/// the candidates were found in.
pub fn rank(mut candidates: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}

/// Top `size` of a ranked list in random order, so the single best courier
/// is not always the one asked first.
pub fn shortlist(mut ranked: Vec<ScoredCandidate>, size: usize) -> Vec<ScoredCandidate> {
    ranked.truncate(size);
    ranked.shuffle(&mut rand::thread_rng());
    ranked
}
