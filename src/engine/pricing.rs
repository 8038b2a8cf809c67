/// Courier payout for one delivery.
pub trait PricingAdapter: Send + Sync {
    fn calculate_payout(&self, distance_km: f64, eta_min: f64, surge: f64) -> f64;
}

/// `(base + per_km·distance + per_min·duration) · surge`
#[derive(Debug, Clone)]
pub struct RiderPayoutPricing {
    pub base_pay: f64,
    pub per_km: f64,
    pub per_min: f64,
}

impl Default for RiderPayoutPricing {
    fn default() -> Self {
        Self {
            base_pay: 20.0,
            per_km: 6.0,
            per_min: 0.5,
        }
    }
}

impl PricingAdapter for RiderPayoutPricing {
    fn calculate_payout(&self, distance_km: f64, eta_min: f64, surge: f64) -> f64 {
        (self.base_pay + distance_km * self.per_km + eta_min * self.per_min) * surge
    }
}
