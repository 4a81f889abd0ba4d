//! Guard rails on what leaves the bridge: per-result output limits and the
//! whole-response circuit breaker.

pub mod output;
pub mod response;

pub use output::{LimitScope, apply_limit};
pub use response::enforce as enforce_response_limit;
