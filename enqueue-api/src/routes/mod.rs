pub mod liveness;
pub mod queue_health;
pub mod readiness;
