//! Identifier template interpolation.
//!
//! Rules carry an identifier template such as `{context.userId}` that is
//! resolved once per field access to partition rate limit buckets. The
//! limiter only depends on the [`Interpolator`] trait; the request context
//! is opaque to it and handed through untouched.
//!
//! [`TemplateInterpolator`] is the default implementation for JSON
//! contexts. It understands two placeholder roots:
//!
//! - `{env.NAME}` looks up `NAME` in the environment snapshot
//! - `{context.a.b}` walks the request context by object key or array index
//!
//! Everything outside braces is copied literally.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

/// Errors raised while parsing or resolving an identifier template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpolationError {
    /// The template itself is malformed
    #[error("invalid template \"{template}\": {reason}")]
    Syntax { template: String, reason: String },

    /// A placeholder referenced a value that is absent or null
    #[error("no value for \"{path}\"")]
    Missing { path: String },

    /// The template resolved to an empty identifier
    #[error("template \"{template}\" resolved to an empty identifier")]
    Empty { template: String },
}

/// Variables visible to a template.
pub struct Vars<'a, C: ?Sized> {
    /// Environment snapshot
    pub env: &'a HashMap<String, String>,
    /// Request-scoped context, opaque to the limiter
    pub context: &'a C,
}

/// Resolves identifier templates against a request context.
pub trait Interpolator<C: ?Sized>: Send + Sync {
    /// Resolve `template` against `vars`.
    fn interpolate(&self, template: &str, vars: &Vars<'_, C>) -> Result<String, InterpolationError>;

    /// Check a template ahead of time, so malformed configuration is
    /// rejected before any request is served.
    fn validate(&self, _template: &str) -> Result<(), InterpolationError> {
        Ok(())
    }
}

/// Default interpolator for `serde_json::Value` contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateInterpolator;

impl TemplateInterpolator {
    /// Create a new interpolator.
    pub fn new() -> Self {
        Self
    }
}

impl Interpolator<Value> for TemplateInterpolator {
    fn interpolate(
        &self,
        template: &str,
        vars: &Vars<'_, Value>,
    ) -> Result<String, InterpolationError> {
        let mut out = String::with_capacity(template.len());

        for segment in parse(template)? {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Env(name) => {
                    let value = vars.env.get(name).ok_or_else(|| InterpolationError::Missing {
                        path: format!("env.{}", name),
                    })?;
                    out.push_str(value);
                }
                Segment::Context(path) => {
                    let value = lookup(vars.context, &path).ok_or_else(|| {
                        InterpolationError::Missing {
                            path: display_path(&path),
                        }
                    })?;
                    out.push_str(&render(value).ok_or_else(|| InterpolationError::Missing {
                        path: display_path(&path),
                    })?);
                }
            }
        }

        Ok(out)
    }

    fn validate(&self, template: &str) -> Result<(), InterpolationError> {
        parse(template).map(|_| ())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'t> {
    Literal(&'t str),
    Env(&'t str),
    Context(Vec<&'t str>),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, InterpolationError> {
    let syntax = |reason: &str| InterpolationError::Syntax {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut segments = Vec::new();
    let mut rest = template;

    while !rest.is_empty() {
        let open = rest.find('{');
        let close = rest.find('}');

        match (open, close) {
            (None, None) => {
                segments.push(Segment::Literal(rest));
                break;
            }
            (None, Some(_)) => return Err(syntax("unmatched '}'")),
            (Some(o), Some(c)) if c < o => return Err(syntax("unmatched '}'")),
            (Some(_), None) => return Err(syntax("unclosed '{'")),
            (Some(o), Some(c)) => {
                if o > 0 {
                    segments.push(Segment::Literal(&rest[..o]));
                }
                let inner = &rest[o + 1..c];
                if inner.contains('{') {
                    return Err(syntax("nested '{'"));
                }
                segments.push(placeholder(inner.trim()).map_err(|reason| syntax(&reason))?);
                rest = &rest[c + 1..];
            }
        }
    }

    Ok(segments)
}

fn placeholder(inner: &str) -> std::result::Result<Segment<'_>, String> {
    if inner.is_empty() {
        return Err("empty placeholder".to_string());
    }

    let mut parts = inner.split('.');
    let root = parts.next().unwrap_or_default();
    let path: Vec<&str> = parts.collect();

    if path.iter().any(|p| p.is_empty()) {
        return Err(format!("empty path segment in \"{}\"", inner));
    }

    // Paths are dotted keys only; bracket or quoted access is never resolvable
    if let Some(bad) = path
        .iter()
        .flat_map(|p| p.chars())
        .find(|c| matches!(c, '[' | ']' | '\'' | '"') || c.is_whitespace())
    {
        return Err(format!("unsupported character {:?} in \"{}\"", bad, inner));
    }

    match root {
        "env" => match path.as_slice() {
            [name] => Ok(Segment::Env(*name)),
            _ => Err(format!("\"{}\" must name exactly one variable", inner)),
        },
        "context" => Ok(Segment::Context(path)),
        other => Err(format!("unknown root \"{}\"", other)),
    }
}

fn lookup<'v>(root: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn display_path(path: &[&str]) -> String {
    if path.is_empty() {
        "context".to_string()
    } else {
        format!("context.{}", path.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(template: &str, context: &Value) -> Result<String, InterpolationError> {
        let env = HashMap::from([("REGION".to_string(), "eu-west".to_string())]);
        TemplateInterpolator::new().interpolate(template, &Vars { env: &env, context })
    }

    #[test]
    fn test_context_placeholder() {
        let ctx = json!({ "userId": "1" });
        assert_eq!(resolve("{context.userId}", &ctx).unwrap(), "1");
    }

    #[test]
    fn test_nested_path_and_literals() {
        let ctx = json!({ "user": { "id": 42, "roles": ["admin", "dev"] } });
        assert_eq!(
            resolve("user-{context.user.id}/{context.user.roles.1}", &ctx).unwrap(),
            "user-42/dev"
        );
    }

    #[test]
    fn test_env_placeholder() {
        let ctx = json!({ "ip": "10.0.0.1" });
        assert_eq!(
            resolve("{env.REGION}:{ context.ip }", &ctx).unwrap(),
            "eu-west:10.0.0.1"
        );
    }

    #[test]
    fn test_missing_values() {
        let ctx = json!({ "userId": null });

        assert_eq!(
            resolve("{context.userId}", &ctx),
            Err(InterpolationError::Missing {
                path: "context.userId".to_string()
            })
        );
        assert_eq!(
            resolve("{context.other}", &ctx),
            Err(InterpolationError::Missing {
                path: "context.other".to_string()
            })
        );
        assert!(matches!(
            resolve("{env.HOME_DIR}", &ctx),
            Err(InterpolationError::Missing { .. })
        ));
    }

    #[test]
    fn test_plain_template_is_literal() {
        assert_eq!(resolve("global", &json!({})).unwrap(), "global");
    }

    #[test]
    fn test_validate_rejects_malformed_templates() {
        let interpolator = TemplateInterpolator::new();

        for template in [
            "{context.userId",
            "context.userId}",
            "{}",
            "{context..id}",
            "{{context.id}}",
            "{session.id}",
            "{env}",
            "{env.A.B}",
            "{context.headers['x-user-id']}",
            "{context.headers[0]}",
            "{context.user id}",
        ] {
            assert!(
                matches!(
                    interpolator.validate(template),
                    Err(InterpolationError::Syntax { .. })
                ),
                "{} should be rejected",
                template
            );
        }

        assert!(interpolator.validate("{context.user.id}-{env.REGION}").is_ok());
    }

    #[test]
    fn test_dotted_key_with_dash_is_resolvable() {
        let template = "{context.headers.x-user-id}";
        let context = json!({ "headers": { "x-user-id": "42" } });

        assert!(TemplateInterpolator::new().validate(template).is_ok());
        assert_eq!(resolve(template, &context).unwrap(), "42");
    }
}
