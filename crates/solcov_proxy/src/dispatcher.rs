//! The background dispatcher: pops one job per tick and runs it to
//! completion, so at most one debug trace is in flight against the node at
//! any time.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use solcov_rpc::{eth::TransactionReceipt, tracer::TraceHits};

use crate::{queue::Job, state::AppState};

/// Dispatcher wake-up interval.
const DISPATCH_INTERVAL: Duration = Duration::from_millis(50);
/// Receipt polling: the node may not have mined or indexed the transaction
/// yet when the job runs.
const RECEIPT_RETRIES: u32 = 100;
const RECEIPT_RETRY_DELAY: Duration = Duration::from_millis(30);

/// Runs forever, serializing all trace work.
pub(crate) async fn run(state: Arc<AppState>) {
    let mut tick = tokio::time::interval(DISPATCH_INTERVAL);

    loop {
        tick.tick().await;

        if let Some(job) = state.queue.pop() {
            process_job(&state, job).await;
            state.queue.complete();
        }
    }
}

/// Processes one job. Failures are reported once and the job is dropped;
/// nothing here can abort the proxy.
async fn process_job(state: &AppState, job: Job) {
    let result = match job {
        Job::Transaction { tx_hash } => trace_transaction(state, &tx_hash).await,
        Job::Call { call, block_number } => trace_call(state, &call, block_number).await,
    };

    if let Err(report) = result {
        state.log.warn_once(report);
    }
}

async fn trace_transaction(state: &AppState, tx_hash: &str) -> Result<(), String> {
    wait_for_receipt(state, tx_hash).await?;

    match state.client.debug_trace_transaction(tx_hash).await {
        Ok(Some(hits)) => {
            attribute(state, &hits).await;
            Ok(())
        }
        Ok(None) => Err(format!("no trace result for transaction {tx_hash}")),
        Err(error) => Err(format!("failed to trace transaction {tx_hash}: {error}")),
    }
}

async fn trace_call(state: &AppState, call: &Value, block_number: u64) -> Result<(), String> {
    match state.client.debug_trace_call(call, block_number).await {
        Ok(Some(hits)) => {
            attribute(state, &hits).await;
            Ok(())
        }
        Ok(None) => Err(format!(
            "no trace result for call {call} at block {block_number}"
        )),
        Err(error) => Err(format!(
            "failed to trace call {call} at block {block_number}: {error}"
        )),
    }
}

/// Polls for the transaction receipt with bounded retries. The job is
/// abandoned if the receipt never appears.
async fn wait_for_receipt(state: &AppState, tx_hash: &str) -> Result<TransactionReceipt, String> {
    for _ in 0..RECEIPT_RETRIES {
        match state.client.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => return Ok(receipt),
            Ok(None) => tokio::time::sleep(RECEIPT_RETRY_DELAY).await,
            Err(error) => {
                return Err(format!("receipt lookup for {tx_hash} failed: {error}"));
            }
        }
    }

    Err(format!(
        "no receipt for {tx_hash} after {RECEIPT_RETRIES} attempts; abandoning trace"
    ))
}

/// Attributes the tracer's per-bytecode hit counts to artifacts and marks
/// the visited PCs. Unmatched bytecodes are skipped (and logged once).
async fn attribute(state: &AppState, hits: &TraceHits) {
    let mut registry = state.registry.write().await;

    for (code, counts) in &hits.0 {
        let Some(index) = registry.match_bytecode(code, &state.log) else {
            continue;
        };

        for pc in counts.keys() {
            if let Ok(pc) = pc.parse::<usize>() {
                registry.mark_visited(index, pc);
            }
        }
    }
}
