//! Concurrent fan-out of one iteration's tool calls.
//!
//! The executor never performs retries itself; `max_retries` and the
//! effective latency budget are passed through to the registry, which owns
//! the invocation contract. This layer guarantees uniform bookkeeping: one
//! [`ToolCallRecord`] per call, win or lose, in input order.

use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use super::error::ToolError;
use super::interface::ToolRegistry;
use crate::application::agent::directive::ToolKind;
use crate::domain::types::{ToolCall, ToolCallRecord, ToolResult, summarize_arguments};

/// One executed call: the originating call, its outcome, and the audit
/// record synthesized for it.
#[derive(Debug)]
pub struct BatchItem {
    pub call: ToolCall,
    pub outcome: Result<ToolResult, ToolError>,
    pub record: ToolCallRecord,
}

impl BatchItem {
    pub fn succeeded(&self) -> bool {
        matches!(&self.outcome, Ok(result) if result.success)
    }
}

/// Executes all calls concurrently, returning one [`BatchItem`] per call in
/// input order regardless of completion order. Never fails as a whole:
/// lookup and execution errors are captured per call.
///
/// Search-class calls have their latency budget raised to
/// `search_latency_floor_ms`; search latency is high-variance enough that
/// caller budgets tuned for local tools starve it.
pub async fn execute_batch(
    registry: &dyn ToolRegistry,
    calls: Vec<ToolCall>,
    max_retries: u32,
    latency_budget_ms: u64,
    search_latency_floor_ms: u64,
) -> Vec<BatchItem> {
    let futures: Vec<_> = calls
        .into_iter()
        .map(|call| {
            let effective_budget = if ToolKind::classify(&call.name).is_search() {
                latency_budget_ms.max(search_latency_floor_ms)
            } else {
                latency_budget_ms
            };
            execute_call(registry, call, max_retries, effective_budget)
        })
        .collect();

    join_all(futures).await
}

async fn execute_call(
    registry: &dyn ToolRegistry,
    call: ToolCall,
    max_retries: u32,
    latency_budget_ms: u64,
) -> BatchItem {
    let arguments_summary = summarize_arguments(&call.arguments);
    let started = Instant::now();
    let outcome = registry
        .execute(&call.name, &call.arguments, max_retries, latency_budget_ms)
        .await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let record = match &outcome {
        Ok(result) => {
            debug!(
                tool = %call.name,
                success = result.success,
                elapsed_ms,
                "Tool executed"
            );
            ToolCallRecord {
                name: call.name.clone(),
                success: result.success,
                execution_time_ms: result.execution_time_ms().unwrap_or(elapsed_ms),
                arguments_summary,
                timed_out: result.timed_out(),
                retries_used: result.retries_used().unwrap_or(0) as u32,
                latency_budget_ms: result.latency_budget_ms().unwrap_or(latency_budget_ms),
                recorded_at: Utc::now(),
            }
        }
        Err(err) => {
            warn!(tool = %call.name, elapsed_ms, error = %err, "Tool execution failed");
            // The attempt count inside a failed retry sequence is not
            // reconstructable from out here; report zero rather than guess.
            ToolCallRecord {
                name: call.name.clone(),
                success: false,
                execution_time_ms: elapsed_ms,
                arguments_summary,
                timed_out: err.is_timeout(),
                retries_used: 0,
                latency_budget_ms,
                recorded_at: Utc::now(),
            }
        }
    };

    BatchItem {
        call,
        outcome,
        record,
    }
}
