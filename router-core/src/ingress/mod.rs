//! Data-plane ingress: the two inbound routes (`/openai/v1/chat/completions`,
//! `/anthropic/v1/messages`), bearer auth, model extraction, and the
//! terminal Pingora gateway that drives Selector + Adapter + Forwarder.

mod gateway;

pub use gateway::IngressGateway;
