//! Fieldlimit - Field-Scoped Rate Limiting
//!
//! This crate implements a per-field rate limiter for GraphQL gateways and
//! other request pipelines. Declarative rules select fields by type/field
//! glob patterns, partition callers by an identifier resolved from the
//! request context, and allow a fixed number of accesses per fixed time
//! window. All state is in-process.

pub mod config;
pub mod error;
pub mod interpolate;
pub mod ratelimit;
pub mod replay;
