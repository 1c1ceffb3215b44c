//! Core field rate limiter implementation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{FieldLimitError, Result};
use crate::interpolate::{InterpolationError, Interpolator, TemplateInterpolator, Vars};

use super::bucket::Bucket;
use super::expiry::{Expiry, ExpiryQueue};
use super::key::BucketKey;
use super::rules::{compile, CompiledRule, RateLimitConfig, UnresolvedIdentifierPolicy};

/// Outcome of evaluating one field access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    /// Every matching rule had a token left
    Allow,
    /// At least one matching rule was exhausted; the field must be dropped
    /// from the request
    Reject(Rejection),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Decision::Allow => None,
            Decision::Reject(rejection) => Some(rejection),
        }
    }
}

/// A user-visible rate limit failure attached to a field path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub message: String,
    pub path: Vec<String>,
}

impl Rejection {
    fn exceeded(key: &BucketKey) -> Self {
        Self {
            message: format!(
                "Rate limit of \"{}\" exceeded for \"{}\"",
                key.coordinate(),
                key.identifier
            ),
            path: vec![key.field_name.clone()],
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// The field rate limiter.
///
/// Owns the compiled rules, the token buckets and their pending expiries.
/// One instance is created per gateway or per session and shared by
/// reference (usually behind an `Arc`); all methods take `&self` and are
/// safe to call from concurrent requests.
///
/// `C` is the request context type. It is never inspected here, only
/// handed to the interpolator `I`.
pub struct FieldRateLimiter<C: ?Sized = Value, I = TemplateInterpolator> {
    rules: Vec<CompiledRule>,
    /// Token buckets indexed by bucket key
    buckets: DashMap<BucketKey, Bucket>,
    expiries: ExpiryQueue,
    interpolator: I,
    env: HashMap<String, String>,
    policy: UnresolvedIdentifierPolicy,
    reap_interval: Duration,
    next_generation: AtomicU64,
    /// Held shared by evaluations and exclusively by teardown, so no
    /// evaluation can schedule an expiry after teardown has cancelled them
    gate: RwLock<()>,
    torn_down: AtomicBool,
    wake: Notify,
    _context: PhantomData<fn(&C)>,
}

impl FieldRateLimiter<Value, TemplateInterpolator> {
    /// Create a limiter for JSON request contexts using the default
    /// template interpolator.
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        Self::with_interpolator(config, TemplateInterpolator::new())
    }
}

impl<C: ?Sized, I: Interpolator<C>> FieldRateLimiter<C, I> {
    /// Create a limiter with a custom interpolator.
    ///
    /// The whole configuration is validated here: glob patterns, limits,
    /// identifier templates and the unresolved-identifier policy. Nothing
    /// is served from a partially valid rule set.
    pub fn with_interpolator(config: &RateLimitConfig, interpolator: I) -> Result<Self> {
        let rules = compile(&config.rules)?;

        for rule in &rules {
            interpolator.validate(rule.identifier()).map_err(|e| {
                FieldLimitError::Config(format!("rule #{}: {}", rule.index(), e))
            })?;
        }

        if let UnresolvedIdentifierPolicy::Sentinel { sentinel } = &config.unresolved_identifier {
            if sentinel.is_empty() {
                return Err(FieldLimitError::Config(
                    "unresolved identifier sentinel must not be empty".into(),
                ));
            }
        }

        info!(
            rules = rules.len(),
            policy = ?config.unresolved_identifier,
            "Field rate limiter initialized"
        );

        Ok(Self {
            rules,
            buckets: DashMap::new(),
            expiries: ExpiryQueue::new(),
            interpolator,
            env: std::env::vars().collect(),
            policy: config.unresolved_identifier.clone(),
            reap_interval: config.reap_interval(),
            next_generation: AtomicU64::new(1),
            gate: RwLock::new(()),
            torn_down: AtomicBool::new(false),
            wake: Notify::new(),
            _context: PhantomData,
        })
    }

    /// Replace the environment snapshot visible to `{env.*}` placeholders.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Evaluate one field access and consume tokens from every matching
    /// rule.
    ///
    /// Rules are evaluated independently: each matching rule with a token
    /// left loses one, and the access is rejected if any matching rule was
    /// exhausted. The rejection reported is the first exhausted rule's, in
    /// rule order. A field matching no rule is allowed without creating
    /// state.
    ///
    /// Identifiers for all matching rules are resolved before any token is
    /// taken, so an interpolation error leaves the buckets untouched.
    pub fn evaluate(&self, type_name: &str, field_name: &str, context: &C) -> Result<Decision> {
        let _gate = self.gate.read();
        if self.is_torn_down() {
            return Err(FieldLimitError::TornDown);
        }

        let now = Instant::now();
        self.reap_expired(now);

        let matched = self
            .rules
            .iter()
            .filter(|rule| rule.matches(type_name, field_name))
            .map(|rule| self.resolve_identifier(rule, context).map(|id| (rule, id)))
            .collect::<Result<Vec<_>>>()?;

        trace!(
            type_name = %type_name,
            field_name = %field_name,
            matched = matched.len(),
            "Evaluating field access"
        );

        let mut rejection = None;
        for (rule, identifier) in matched {
            let key = BucketKey::new(rule.index(), &identifier, type_name, field_name);
            if !self.consume(rule, &key, now) && rejection.is_none() {
                rejection = Some(Rejection::exceeded(&key));
            }
        }

        Ok(match rejection {
            Some(rejection) => Decision::Reject(rejection),
            None => Decision::Allow,
        })
    }

    /// Cancel every pending expiry and drop all buckets.
    ///
    /// Called once when the owning session or process ends. Later calls are
    /// no-ops returning 0; later evaluations fail with
    /// [`FieldLimitError::TornDown`]. Returns the number of expiries
    /// cancelled.
    pub fn on_teardown(&self) -> usize {
        let _gate = self.gate.write();
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let cancelled = self.expiries.cancel_all();
        let buckets = self.buckets.len();
        self.buckets.clear();
        self.wake.notify_one();

        info!(
            cancelled = cancelled,
            buckets = buckets,
            "Field rate limiter torn down"
        );
        cancelled
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Take one token from the bucket for `key`, creating the bucket (and
    /// its single expiry) if there is no live one.
    ///
    /// A bucket that is past its deadline but not yet reaped is replaced
    /// here, and its stale expiry is cancelled so the key never has more
    /// than one pending expiry.
    fn consume(&self, rule: &CompiledRule, key: &BucketKey, now: Instant) -> bool {
        let (allowed, reset_in, created) = match self.buckets.entry(key.clone()) {
            Entry::Occupied(mut entry) if !entry.get().is_expired(now) => {
                let bucket = entry.get_mut();
                (bucket.try_consume(), bucket.duration_until_reset(now), None)
            }
            entry => {
                let stale = match &entry {
                    Entry::Occupied(expired) => Some(expired.get().generation()),
                    Entry::Vacant(_) => None,
                };

                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let mut bucket = Bucket::new(rule.max(), rule.ttl(), generation, now);
                let allowed = bucket.try_consume();
                let reset_in = bucket.duration_until_reset(now);
                let expiry = Expiry {
                    deadline: bucket.expires_at(),
                    key: key.clone(),
                    generation,
                };

                debug!(
                    key = %key,
                    max = bucket.max(),
                    ttl_ms = rule.ttl().as_millis() as u64,
                    replaced = stale.is_some(),
                    "Creating new bucket"
                );

                entry.insert(bucket);
                (allowed, reset_in, Some((expiry, stale)))
            }
        };

        if let Some((expiry, stale)) = created {
            if let Some(generation) = stale {
                self.expiries.cancel(&expiry.key, generation);
            }
            if self.expiries.schedule(expiry) {
                self.wake.notify_one();
            }
        }

        if !allowed {
            debug!(
                key = %key,
                reset_in_ms = reset_in.as_millis() as u64,
                "Rate limit exceeded"
            );
        }
        allowed
    }

    fn resolve_identifier(&self, rule: &CompiledRule, context: &C) -> Result<String> {
        let vars = Vars {
            env: &self.env,
            context,
        };

        let resolved = self
            .interpolator
            .interpolate(rule.identifier(), &vars)
            .and_then(|identifier| {
                if identifier.is_empty() {
                    Err(InterpolationError::Empty {
                        template: rule.identifier().to_string(),
                    })
                } else {
                    Ok(identifier)
                }
            });

        match (resolved, &self.policy) {
            (Ok(identifier), _) => Ok(identifier),
            (Err(error), UnresolvedIdentifierPolicy::Sentinel { sentinel }) => {
                warn!(
                    rule = rule.index(),
                    error = %error,
                    sentinel = %sentinel,
                    "Identifier unresolved, using shared sentinel bucket"
                );
                Ok(sentinel.clone())
            }
            (Err(error), UnresolvedIdentifierPolicy::Reject) => {
                debug!(rule = rule.index(), error = %error, "Identifier unresolved");
                Err(error.into())
            }
        }
    }

    /// Delete buckets whose windows ended at or before `now`.
    ///
    /// An expiry only deletes the bucket generation it was created for; if
    /// the key has since been given a fresh bucket, it is left alone.
    pub(crate) fn reap_expired(&self, now: Instant) -> usize {
        if self.expiries.is_empty() {
            return 0;
        }

        let mut removed = 0;
        for expiry in self.expiries.pop_due(now) {
            let generation = expiry.generation;
            if self
                .buckets
                .remove_if(&expiry.key, |_, bucket| bucket.generation() == generation)
                .is_some()
            {
                debug!(key = %expiry.key, "Bucket window expired");
                removed += 1;
            }
        }
        removed
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.expiries.next_deadline()
    }

    pub(crate) fn reap_interval(&self) -> Duration {
        self.reap_interval
    }

    /// Resolves when an earlier expiry was scheduled or the limiter was
    /// torn down.
    pub(crate) async fn woken(&self) {
        self.wake.notified().await
    }

    /// Tokens left for a bucket, or `None` if it does not exist.
    pub fn remaining_tokens(
        &self,
        rule: usize,
        identifier: &str,
        type_name: &str,
        field_name: &str,
    ) -> Option<u64> {
        let key = BucketKey::new(rule, identifier, type_name, field_name);
        self.buckets.get(&key).map(|bucket| bucket.remaining())
    }

    /// Get the number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Get the number of pending expiries.
    pub fn pending_timer_count(&self) -> usize {
        self.expiries.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::rules::RateLimitRule;
    use serde_json::json;
    use std::sync::Arc;

    fn limiter(rules: Vec<RateLimitRule>) -> FieldRateLimiter {
        let config = RateLimitConfig {
            rules,
            ..RateLimitConfig::default()
        };
        FieldRateLimiter::new(&config).unwrap()
    }

    fn user_rule(max: u64, ttl: u64) -> RateLimitRule {
        RateLimitRule::new("Query", "foo", "{context.userId}", max, ttl)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_after_max_accesses() {
        let limiter = limiter(vec![user_rule(5, 5000)]);
        let ctx = json!({ "userId": "1" });

        for i in 0..5 {
            let decision = limiter.evaluate("Query", "foo", &ctx).unwrap();
            assert_eq!(decision, Decision::Allow, "Access {} should be allowed", i);
        }

        let decision = limiter.evaluate("Query", "foo", &ctx).unwrap();
        let rejection = decision.rejection().unwrap();
        assert_eq!(rejection.message, "Rate limit of \"Query.foo\" exceeded for \"1\"");
        assert_eq!(rejection.path, vec!["foo".to_string()]);
        assert_eq!(limiter.remaining_tokens(0, "1", "Query", "foo"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_reset_after_ttl() {
        let limiter = limiter(vec![user_rule(5, 1000)]);
        let ctx = json!({ "userId": "1" });

        for _ in 0..5 {
            assert!(limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());
        }

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());
        assert_eq!(limiter.remaining_tokens(0, "1", "Query", "foo"), Some(4));
        assert_eq!(limiter.pending_timer_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_fixed_from_first_access() {
        let limiter = limiter(vec![user_rule(2, 1000)]);
        let ctx = json!({ "userId": "1" });

        assert!(limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());
        tokio::time::advance(Duration::from_millis(300)).await;
        assert!(!limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());

        // 1000ms after the first access, not after the last one
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_identifiers_have_separate_buckets() {
        let limiter = limiter(vec![user_rule(1, 1000)]);

        for i in 0..2 {
            let ctx = json!({ "userId": format!("User{}", i) });

            assert!(limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());

            let decision = limiter.evaluate("Query", "foo", &ctx).unwrap();
            assert_eq!(
                decision.rejection().unwrap().message,
                format!("Rate limit of \"Query.foo\" exceeded for \"User{}\"", i)
            );
        }

        assert_eq!(limiter.bucket_count(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_field_creates_no_state() {
        let limiter = limiter(vec![user_rule(1, 1000)]);
        let ctx = json!({ "userId": "1" });

        for _ in 0..3 {
            assert!(limiter.evaluate("Query", "bar", &ctx).unwrap().is_allowed());
            assert!(limiter.evaluate("Mutation", "foo", &ctx).unwrap().is_allowed());
        }

        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.pending_timer_count(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_field_skips_interpolation() {
        let limiter = limiter(vec![user_rule(1, 1000)]);

        // No userId, but the rule does not apply to this field
        let decision = limiter.evaluate("Query", "bar", &json!({})).unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_rules_are_independent() {
        let limiter = limiter(vec![
            RateLimitRule::new("Query", "*", "{context.userId}", 3, 1000),
            RateLimitRule::new("*", "foo", "{context.userId}", 1, 1000),
        ]);
        let ctx = json!({ "userId": "7" });

        assert!(limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());

        // The second rule is exhausted; the first still has tokens
        let decision = limiter.evaluate("Query", "foo", &ctx).unwrap();
        assert!(!decision.is_allowed());
        assert_eq!(limiter.remaining_tokens(0, "7", "Query", "foo"), Some(1));
        assert_eq!(limiter.remaining_tokens(1, "7", "Query", "foo"), Some(0));

        // Other fields are governed by the first rule only
        assert!(limiter.evaluate("Query", "bar", &ctx).unwrap().is_allowed());
        assert_eq!(limiter.bucket_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_exhausted_rule_is_reported() {
        let limiter = limiter(vec![
            RateLimitRule::new("Query", "foo", "user:{context.userId}", 1, 1000),
            RateLimitRule::new("Query", "foo", "org:{context.orgId}", 1, 1000),
        ]);
        let ctx = json!({ "userId": "1", "orgId": "acme" });

        assert!(limiter.evaluate("Query", "foo", &ctx).unwrap().is_allowed());
        let decision = limiter.evaluate("Query", "foo", &ctx).unwrap();
        assert_eq!(
            decision.rejection().unwrap().message,
            "Rate limit of \"Query.foo\" exceeded for \"user:1\""
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_buckets_are_reaped_on_access() {
        let limiter = limiter(vec![user_rule(1, 1000)]);

        limiter.evaluate("Query", "foo", &json!({ "userId": "a" })).unwrap();
        assert_eq!(limiter.bucket_count(), 1);

        tokio::time::advance(Duration::from_millis(1500)).await;
        limiter.evaluate("Query", "foo", &json!({ "userId": "b" })).unwrap();

        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.pending_timer_count(), 1);
        assert_eq!(limiter.remaining_tokens(0, "a", "Query", "foo"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_pending_timer_per_bucket() {
        let limiter = limiter(vec![user_rule(10, 1000)]);
        let ctx = json!({ "userId": "1" });

        for _ in 0..10 {
            limiter.evaluate("Query", "foo", &ctx).unwrap();
        }
        assert_eq!(limiter.pending_timer_count(), 1);

        tokio::time::advance(Duration::from_millis(1000)).await;
        limiter.evaluate("Query", "foo", &ctx).unwrap();
        assert_eq!(limiter.pending_timer_count(), 1);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_unreaped_bucket_is_replaced() {
        let limiter = limiter(vec![user_rule(3, 1000)]);
        let ctx = json!({ "userId": "1" });
        let key = BucketKey::new(0, "1", "Query", "foo");

        for _ in 0..3 {
            limiter.evaluate("Query", "foo", &ctx).unwrap();
        }
        assert_eq!(limiter.remaining_tokens(0, "1", "Query", "foo"), Some(0));

        // Past the deadline, but nothing has reaped the old bucket yet
        tokio::time::advance(Duration::from_millis(1000)).await;
        let later = Instant::now();
        assert!(limiter.consume(&limiter.rules()[0], &key, later));

        assert_eq!(limiter.pending_timer_count(), 1);
        assert_eq!(limiter.reap_expired(later), 0);
        assert_eq!(limiter.remaining_tokens(0, "1", "Query", "foo"), Some(2));
        assert_eq!(limiter.on_teardown(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_expiry_does_not_delete_replacement() {
        let limiter = limiter(vec![user_rule(3, 1000)]);
        let ctx = json!({ "userId": "1" });
        let key = BucketKey::new(0, "1", "Query", "foo");

        limiter.evaluate("Query", "foo", &ctx).unwrap();

        // An expiry left over from an older generation of the same key
        let now = Instant::now();
        limiter.expiries.schedule(Expiry {
            deadline: now,
            key: key.clone(),
            generation: 0,
        });

        assert_eq!(limiter.reap_expired(now), 0);
        assert_eq!(limiter.remaining_tokens(0, "1", "Query", "foo"), Some(2));
        assert_eq!(limiter.pending_timer_count(), 1);
    }

    #[tokio::test]
    async fn test_teardown_cancels_all_timers() {
        let limiter = limiter(vec![user_rule(1, 60_000)]);

        for i in 0..3 {
            limiter
                .evaluate("Query", "foo", &json!({ "userId": i }))
                .unwrap();
        }
        assert_eq!(limiter.pending_timer_count(), 3);

        assert_eq!(limiter.on_teardown(), 3);
        assert_eq!(limiter.pending_timer_count(), 0);
        assert_eq!(limiter.bucket_count(), 0);
        assert!(limiter.is_torn_down());

        // Second call is a no-op
        assert_eq!(limiter.on_teardown(), 0);

        let result = limiter.evaluate("Query", "foo", &json!({ "userId": 0 }));
        assert!(matches!(result, Err(FieldLimitError::TornDown)));
    }

    #[tokio::test]
    async fn test_unresolved_identifier_rejected_by_default() {
        let limiter = limiter(vec![user_rule(1, 1000)]);

        let missing = limiter.evaluate("Query", "foo", &json!({}));
        assert!(matches!(
            missing,
            Err(FieldLimitError::Interpolation(InterpolationError::Missing { .. }))
        ));

        let empty = limiter.evaluate("Query", "foo", &json!({ "userId": "" }));
        assert!(matches!(
            empty,
            Err(FieldLimitError::Interpolation(InterpolationError::Empty { .. }))
        ));

        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_interpolation_error_consumes_no_tokens() {
        let limiter = limiter(vec![
            RateLimitRule::new("Query", "foo", "{context.userId}", 5, 1000),
            RateLimitRule::new("Query", "foo", "{context.orgId}", 5, 1000),
        ]);

        let result = limiter.evaluate("Query", "foo", &json!({ "userId": "1" }));
        assert!(result.is_err());
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_policy_shares_one_bucket() {
        let config = RateLimitConfig {
            rules: vec![user_rule(1, 1000)],
            unresolved_identifier: UnresolvedIdentifierPolicy::Sentinel {
                sentinel: "anonymous".to_string(),
            },
            ..RateLimitConfig::default()
        };
        let limiter = FieldRateLimiter::new(&config).unwrap();

        assert!(limiter.evaluate("Query", "foo", &json!({})).unwrap().is_allowed());

        let decision = limiter
            .evaluate("Query", "foo", &json!({ "userId": null }))
            .unwrap();
        assert_eq!(
            decision.rejection().unwrap().message,
            "Rate limit of \"Query.foo\" exceeded for \"anonymous\""
        );
    }

    #[tokio::test]
    async fn test_env_placeholder_uses_snapshot() {
        let config = RateLimitConfig {
            rules: vec![RateLimitRule::new("Query", "foo", "{env.TENANT}", 1, 1000)],
            ..RateLimitConfig::default()
        };
        let limiter = FieldRateLimiter::new(&config)
            .unwrap()
            .with_env(HashMap::from([("TENANT".to_string(), "blue".to_string())]));

        limiter.evaluate("Query", "foo", &json!({})).unwrap();
        assert_eq!(limiter.remaining_tokens(0, "blue", "Query", "foo"), Some(0));
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let bad_template = RateLimitConfig {
            rules: vec![RateLimitRule::new("Query", "foo", "{context.userId", 1, 1000)],
            ..RateLimitConfig::default()
        };
        assert!(matches!(
            FieldRateLimiter::new(&bad_template),
            Err(FieldLimitError::Config(_))
        ));

        let zero_max = RateLimitConfig {
            rules: vec![user_rule(0, 1000)],
            ..RateLimitConfig::default()
        };
        assert!(matches!(
            FieldRateLimiter::new(&zero_max),
            Err(FieldLimitError::Config(_))
        ));

        let empty_sentinel = RateLimitConfig {
            unresolved_identifier: UnresolvedIdentifierPolicy::Sentinel {
                sentinel: String::new(),
            },
            ..RateLimitConfig::default()
        };
        assert!(matches!(
            FieldRateLimiter::new(&empty_sentinel),
            Err(FieldLimitError::Config(_))
        ));
    }

    #[test]
    fn test_concurrent_access_never_exceeds_max() {
        let limiter = Arc::new(limiter(vec![user_rule(100, 60_000)]));
        let ctx = json!({ "userId": "shared" });

        let allowed: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = Arc::clone(&limiter);
                    let ctx = &ctx;
                    scope.spawn(move || {
                        (0..50)
                            .filter(|_| {
                                limiter
                                    .evaluate("Query", "foo", ctx)
                                    .unwrap()
                                    .is_allowed()
                            })
                            .count()
                    })
                })
                .collect();

            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 100);
        assert_eq!(limiter.remaining_tokens(0, "shared", "Query", "foo"), Some(0));
        assert_eq!(limiter.pending_timer_count(), 1);
    }

    #[test]
    fn test_decision_serialization() {
        let allow = serde_json::to_value(Decision::Allow).unwrap();
        assert_eq!(allow, json!({ "decision": "allow" }));

        let key = BucketKey::new(0, "1", "Query", "foo");
        let reject = serde_json::to_value(Decision::Reject(Rejection::exceeded(&key))).unwrap();
        assert_eq!(
            reject,
            json!({
                "decision": "reject",
                "message": "Rate limit of \"Query.foo\" exceeded for \"1\"",
                "path": ["foo"]
            })
        );
    }
}
