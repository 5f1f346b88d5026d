pub mod circuit;
pub mod filter;
pub mod monitor;

pub use circuit::{CircuitBreaker, CircuitBreakerParams, CircuitState};
pub use filter::HealthFilter;
pub use monitor::{HealthMonitor, HealthParams, HealthStatus};
