pub mod coordinator;
pub mod escalation;
pub mod presence;
pub mod pricing;
pub mod scoring;
