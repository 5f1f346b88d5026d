pub mod hybrid;
pub mod random;
pub mod round_robin;
pub mod strategy;
pub mod token_based;

pub use hybrid::HybridTactic;
pub use random::RandomTactic;
pub use round_robin::RoundRobinTactic;
pub use strategy::Tactic;
pub use token_based::TokenBasedTactic;

use crate::domain::rule::TacticSpec;
use std::sync::Arc;

/// Builds the Tactic implementation named by a Rule's `TacticSpec` (spec §9:
/// "a sum type `Tactic` ... with a common `select(rule, services)` operation").
pub fn build(spec: &TacticSpec) -> Arc<dyn Tactic> {
    match spec {
        TacticSpec::RoundRobin { request_threshold } => {
            Arc::new(RoundRobinTactic::new(*request_threshold))
        }
        TacticSpec::Random => Arc::new(RandomTactic),
        TacticSpec::TokenBased { token_threshold } => {
            Arc::new(TokenBasedTactic::new(*token_threshold))
        }
        TacticSpec::Hybrid {
            request_threshold,
            token_threshold,
        } => Arc::new(HybridTactic::new(*request_threshold, *token_threshold)),
    }
}
