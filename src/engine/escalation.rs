//! How each retry widens the search and sweetens the offer.

use crate::config::{DispatchSettings, RejectedCourierPolicy};

/// Attempts are 1-based.
pub fn surge_for_attempt(settings: &DispatchSettings, attempt: u32) -> f64 {
    let steps = f64::from(attempt.saturating_sub(1));
    (1.0 + settings.surge_step * steps).min(settings.max_surge)
}

/// The first two attempts stay at `previous_radius_km`; each later attempt
/// adds one step, capped at the maximum radius.
pub fn radius_for_attempt(settings: &DispatchSettings, attempt: u32, previous_radius_km: f64) -> f64 {
    if attempt > 2 {
        (previous_radius_km + settings.radius_step_km).min(settings.max_radius_km)
    } else {
        previous_radius_km
    }
}

pub fn eta_minutes(settings: &DispatchSettings, distance_km: f64) -> f64 {
    distance_km / settings.average_speed_kmh * 60.0
}

/// Whether reject cooldowns and reject counts filter candidates at this surge.
pub fn applies_refusal_exclusions(settings: &DispatchSettings, surge: f64) -> bool {
    match settings.rejected_policy {
        RejectedCourierPolicy::AlwaysExclude => true,
        RejectedCourierPolicy::ReincludeUnderSurge => surge <= 1.0,
    }
}
