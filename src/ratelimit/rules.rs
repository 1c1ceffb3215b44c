//! Rate limit rules configuration and matching.
//!
//! This module handles loading rate limit rules and compiling their
//! type/field glob patterns once, ahead of any request. A compiled rule
//! applies to a field access when both its type pattern and its field
//! pattern match.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{FieldLimitError, Result};

/// Identifier used for unresolved callers under the sentinel policy.
pub const DEFAULT_SENTINEL: &str = "__unresolved__";

/// Rate limiting configuration: the rule set plus evaluation policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Rules, evaluated independently in order
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,

    /// What to do when an identifier cannot be resolved
    #[serde(default)]
    pub unresolved_identifier: UnresolvedIdentifierPolicy,

    /// Upper bound on how long the background reaper sleeps, in milliseconds
    #[serde(default = "default_reap_interval")]
    pub reap_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            unresolved_identifier: UnresolvedIdentifierPolicy::default(),
            reap_interval_ms: default_reap_interval(),
        }
    }
}

fn default_reap_interval() -> u64 {
    1000
}

/// A single declarative rate limit rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Glob matched against the parent type name
    #[serde(rename = "type")]
    pub type_pattern: String,
    /// Glob matched against the field name
    #[serde(rename = "field")]
    pub field_pattern: String,
    /// Template resolved per request to partition buckets
    pub identifier: String,
    /// Tokens available per window
    pub max: u64,
    /// Window length in milliseconds
    pub ttl: u64,
}

impl RateLimitRule {
    /// Convenience constructor, mostly for tests and embedding.
    pub fn new(
        type_pattern: impl Into<String>,
        field_pattern: impl Into<String>,
        identifier: impl Into<String>,
        max: u64,
        ttl: u64,
    ) -> Self {
        Self {
            type_pattern: type_pattern.into(),
            field_pattern: field_pattern.into(),
            identifier: identifier.into(),
            max,
            ttl,
        }
    }
}

/// Policy for identifiers that fail to interpolate or resolve to "".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum UnresolvedIdentifierPolicy {
    /// Fail the evaluation with an interpolation error
    #[default]
    Reject,
    /// Share one bucket between all unresolved callers
    Sentinel {
        #[serde(default = "default_sentinel")]
        sentinel: String,
    },
}

fn default_sentinel() -> String {
    DEFAULT_SENTINEL.to_string()
}

impl RateLimitConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    ///
    /// Accepts either a full configuration mapping or a bare list of rules.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(rules) = serde_yaml::from_str::<Vec<RateLimitRule>>(yaml) {
            return Ok(Self {
                rules,
                ..Self::default()
            });
        }

        serde_yaml::from_str(yaml).map_err(|e| {
            FieldLimitError::Config(format!("Failed to parse rate limit config: {}", e))
        })
    }

    /// The reaper's maximum sleep.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }
}

/// A compiled glob pattern.
///
/// `*` matches any run of characters (including none) and `?` matches a
/// single character; everything else matches literally. Matching is
/// case-sensitive and anchored at both ends.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    matcher: GlobMatcher,
}

#[derive(Debug, Clone)]
enum GlobMatcher {
    Any,
    Exact,
    Regex(Regex),
}

impl GlobPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(FieldLimitError::Config("glob pattern must not be empty".into()));
        }
        if let Some(c) = pattern.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(FieldLimitError::Config(format!(
                "invalid character {:?} in glob pattern \"{}\"",
                c, pattern
            )));
        }

        let matcher = if pattern.chars().all(|c| c == '*') {
            GlobMatcher::Any
        } else if !pattern.contains(['*', '?']) {
            GlobMatcher::Exact
        } else {
            let mut expr = String::with_capacity(pattern.len() * 2 + 2);
            expr.push('^');
            let mut prev_star = false;
            for c in pattern.chars() {
                match c {
                    '*' if prev_star => continue,
                    '*' => expr.push_str(".*"),
                    '?' => expr.push('.'),
                    other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
                }
                prev_star = c == '*';
            }
            expr.push('$');

            let regex = Regex::new(&expr).map_err(|e| {
                FieldLimitError::Config(format!("invalid glob pattern \"{}\": {}", pattern, e))
            })?;
            GlobMatcher::Regex(regex)
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
        })
    }

    /// Check whether `name` matches this pattern as a whole.
    pub fn is_match(&self, name: &str) -> bool {
        match &self.matcher {
            GlobMatcher::Any => true,
            GlobMatcher::Exact => self.source == name,
            GlobMatcher::Regex(regex) => regex.is_match(name),
        }
    }

    /// The original pattern text.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// A rule with its matchers built; owned by one limiter, never mutated.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    index: usize,
    rule: RateLimitRule,
    type_pattern: GlobPattern,
    field_pattern: GlobPattern,
}

impl CompiledRule {
    /// Position of the rule in the configured list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The rule as configured.
    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    /// Identifier template.
    pub fn identifier(&self) -> &str {
        &self.rule.identifier
    }

    /// Tokens per window.
    pub fn max(&self) -> u64 {
        self.rule.max
    }

    /// Window length.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.rule.ttl)
    }

    pub fn matches_type(&self, type_name: &str) -> bool {
        self.type_pattern.is_match(type_name)
    }

    pub fn matches_field(&self, field_name: &str) -> bool {
        self.field_pattern.is_match(field_name)
    }

    /// A rule governs a field access only when both patterns match.
    pub fn matches(&self, type_name: &str, field_name: &str) -> bool {
        self.matches_type(type_name) && self.matches_field(field_name)
    }
}

/// Compile a rule list, rejecting the whole set if any rule is invalid.
pub fn compile(rules: &[RateLimitRule]) -> Result<Vec<CompiledRule>> {
    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            let invalid = |reason: String| {
                FieldLimitError::Config(format!(
                    "rule #{} ({}.{}): {}",
                    index, rule.type_pattern, rule.field_pattern, reason
                ))
            };

            if rule.max == 0 {
                return Err(invalid("max must be a positive integer".into()));
            }
            if rule.ttl == 0 {
                return Err(invalid("ttl must be a positive number of milliseconds".into()));
            }

            let type_pattern = GlobPattern::new(&rule.type_pattern).map_err(|e| invalid(e.to_string()))?;
            let field_pattern =
                GlobPattern::new(&rule.field_pattern).map_err(|e| invalid(e.to_string()))?;

            Ok(CompiledRule {
                index,
                rule: rule.clone(),
                type_pattern,
                field_pattern,
            })
        })
        .collect()
}
