//! Field rate limiting logic and state management.

mod bucket;
mod expiry;
mod key;
mod lifecycle;
mod limiter;
mod rules;

pub use bucket::Bucket;
pub use expiry::{Expiry, ExpiryQueue};
pub use key::BucketKey;
pub use lifecycle::{spawn_reaper, spawn_teardown_listener};
pub use limiter::{Decision, FieldRateLimiter, Rejection};
pub use rules::{
    compile, CompiledRule, GlobPattern, RateLimitConfig, RateLimitRule,
    UnresolvedIdentifierPolicy, DEFAULT_SENTINEL,
};
