use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance_score: f64,
    pub eta_score: f64,
    pub rating_score: f64,
    pub busy_penalty: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
    TimedOut,
    Expired,
}

impl AssignmentStatus {
    /// `TimedOut` counts as finished for the offer even though it triggers a
    /// fresh dispatch attempt for the order.
    pub fn is_open(self) -> bool {
        self == AssignmentStatus::Pending
    }
}

/// One offer of an order to one courier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub status: AssignmentStatus,
    pub attempt: u32,
    pub surge_multiplier: f64,
    pub distance_km: f64,
    pub eta_min: f64,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub expected_earning: f64,
    pub assigned_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Token of the `courier_busy` lock taken for this offer.
    #[serde(skip)]
    pub courier_lock_token: String,
}
