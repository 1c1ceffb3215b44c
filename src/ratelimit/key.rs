//! Bucket key generation and handling.

/// A key that uniquely identifies a token bucket.
///
/// The key is a structured tuple rather than a joined string, so
/// identifiers or names containing separator characters can never collide.
/// It includes the index of the rule that owns the bucket: two rules
/// matching the same field keep independent buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    /// Index of the owning rule
    pub rule: usize,
    /// Resolved identifier
    pub identifier: String,
    /// Parent type name
    pub type_name: String,
    /// Field name
    pub field_name: String,
}

impl BucketKey {
    /// Create a new bucket key.
    pub fn new(rule: usize, identifier: &str, type_name: &str, field_name: &str) -> Self {
        Self {
            rule,
            identifier: identifier.to_string(),
            type_name: type_name.to_string(),
            field_name: field_name.to_string(),
        }
    }

    /// The `Type.field` coordinate this key covers.
    pub fn coordinate(&self) -> String {
        format!("{}.{}", self.type_name, self.field_name)
    }
}

impl std::fmt::Display for BucketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rule{}:{}@{}.{}",
            self.rule, self.identifier, self.type_name, self.field_name
        )
    }
}
