pub mod clock;
pub mod port;
pub mod production;
pub mod rate_limiter;
pub mod test_provider;

pub use clock::{Clock, FixedClock, SystemClock};
pub use port::{EnrichmentResult, HealthCheck, LlmPort, RenderType, SchemaRender, TaskCandidate, TaskPriority, TextContext};
pub use production::ProductionLlmPort;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use test_provider::{Scripted, TestLlmPort};
