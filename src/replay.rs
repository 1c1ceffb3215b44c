//! Replay of recorded field accesses through a limiter.
//!
//! Input is JSON lines, one field access per line:
//!
//! ```text
//! {"type": "Query", "field": "foo", "context": {"userId": "1"}}
//! ```
//!
//! Each access produces one JSON line: the [`Decision`], or an error
//! object when the line or the evaluation failed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use crate::error::Result;
use crate::ratelimit::{spawn_reaper, Decision, FieldRateLimiter};

/// One recorded field access.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldAccess {
    #[serde(rename = "type")]
    pub type_name: String,
    pub field: String,
    #[serde(default)]
    pub context: Value,
}

/// Result of replaying a single line.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Decided(Decision),
    Failed {
        decision: &'static str,
        error: String,
    },
}

impl Outcome {
    fn failed(error: impl ToString) -> Self {
        Outcome::Failed {
            decision: "error",
            error: error.to_string(),
        }
    }
}

/// Counters for a finished replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub allowed: u64,
    pub rejected: u64,
    pub errors: u64,
}

impl ReplayStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Decided(Decision::Allow) => self.allowed += 1,
            Outcome::Decided(Decision::Reject(_)) => self.rejected += 1,
            Outcome::Failed { .. } => self.errors += 1,
        }
    }
}

/// Evaluate a single JSON line.
pub fn evaluate_line(limiter: &FieldRateLimiter, line: &str) -> Outcome {
    let access: FieldAccess = match serde_json::from_str(line) {
        Ok(access) => access,
        Err(e) => return Outcome::failed(format!("invalid field access: {}", e)),
    };

    match limiter.evaluate(&access.type_name, &access.field, &access.context) {
        Ok(decision) => Outcome::Decided(decision),
        Err(e) => Outcome::failed(e),
    }
}

/// Replay every line of `input` through `limiter`, writing one outcome
/// line per access to `output`. Blank lines are skipped.
pub async fn replay<R, W>(limiter: &FieldRateLimiter, input: R, mut output: W) -> Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stats = ReplayStats::default();
    let mut lines = LinesStream::new(input.lines());

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = evaluate_line(limiter, &line);
        debug!(outcome = ?outcome, "Replayed field access");
        stats.record(&outcome);

        let mut encoded = serde_json::to_vec(&outcome)?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
    }

    output.flush().await?;

    info!(
        allowed = stats.allowed,
        rejected = stats.rejected,
        errors = stats.errors,
        "Replay finished"
    );
    Ok(stats)
}

/// Run a replay session: start the reaper, replay `input` until it ends or
/// `shutdown` resolves, then tear the limiter down.
///
/// Teardown and reaper shutdown happen whether the replay finished, was
/// interrupted or failed. Returns `None` when interrupted.
pub async fn run<R, W, S>(
    limiter: Arc<FieldRateLimiter>,
    input: R,
    output: W,
    shutdown: S,
) -> Result<Option<ReplayStats>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let reaper = spawn_reaper(limiter.clone());

    let result = tokio::select! {
        stats = replay(&limiter, input, output) => stats.map(Some),
        _ = shutdown => Ok(None),
    };

    limiter.on_teardown();
    reaper.await?;
    result
}
