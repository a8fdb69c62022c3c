//! Recognition of trace-worthy JSON-RPC traffic.
//!
//! Every request is forwarded to the upstream node byte-identically; a fixed
//! set of methods additionally enqueues a trace job. For transaction
//! submissions the traced target is the hash the node returned; for
//! call-style methods it is the original call descriptor with the block tag
//! resolved to a concrete number at interception time, so that asynchronous
//! tracing later observes the same state the original call saw.

use serde::Deserialize;
use serde_json::Value;
use solcov_rpc::{RpcClientError, jsonrpc};

use crate::{queue::Job, state::AppState};

/// The parsed parts of an inbound JSON-RPC body the proxy cares about.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

pub(crate) fn parse_envelope(body: &[u8]) -> Option<Envelope> {
    serde_json::from_slice(body).ok()
}

/// Extracts the transaction hash from a forwarded submission response.
pub(crate) fn tx_hash_from_response(response: &[u8]) -> Option<String> {
    let parsed: jsonrpc::Response<Option<String>> = serde_json::from_slice(response).ok()?;
    parsed.data.into_result().ok().flatten()
}

/// Forwards `body` upstream and, for the traced methods, enqueues the
/// matching trace job. The response is returned as-is; trace work never
/// blocks it beyond the block-number pin for call-style methods.
pub(crate) async fn handle_rpc(state: &AppState, body: &[u8]) -> Result<Vec<u8>, RpcClientError> {
    let envelope = parse_envelope(body);
    let response = state.client.forward_raw(body.to_vec()).await?;

    if let Some(envelope) = envelope {
        match envelope.method.as_str() {
            "eth_sendRawTransaction" | "eth_sendTransaction" => {
                if let Some(tx_hash) = tx_hash_from_response(&response) {
                    state.queue.push(Job::Transaction { tx_hash });
                }
            }
            "eth_call" | "eth_estimateGas" | "debug_traceCall" => {
                match call_job(state, &envelope.params).await {
                    Ok(Some(job)) => state.queue.push(job),
                    Ok(None) => {}
                    Err(error) => state.log.warn_once(format!(
                        "failed to pin block for {}: {error}",
                        envelope.method
                    )),
                }
            }
            _ => {}
        }
    }

    Ok(response)
}

/// Builds a call job from `eth_call`-shaped params, pinning a symbolic block
/// tag to a concrete number first.
async fn call_job(state: &AppState, params: &Value) -> Result<Option<Job>, RpcClientError> {
    let Some(call) = params.get(0) else {
        return Ok(None);
    };
    let tag = params
        .get(1)
        .cloned()
        .unwrap_or_else(|| Value::String("latest".to_string()));

    let block_number = state.client.resolve_block_tag(&tag).await?;

    Ok(Some(Job::Call {
        call: call.clone(),
        block_number,
    }))
}
