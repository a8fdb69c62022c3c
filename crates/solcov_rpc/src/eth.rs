//! The eth/debug method surface the coverage core needs from the node.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    client::{RpcClient, RpcClientError},
    tracer::{TraceHits, tracer_options},
};

/// The receipt fields the trace fetcher consumes.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    /// Absent for contract deployments.
    pub to: Option<String>,
    /// Present for contract deployments.
    pub contract_address: Option<String>,
    pub block_number: Option<String>,
}

/// The block-header fields needed to pin a symbolic tag.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: String,
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> Result<u64, RpcClientError> {
    value
        .strip_prefix("0x")
        .and_then(|digits| u64::from_str_radix(digits, 16).ok())
        .ok_or_else(|| RpcClientError::InvalidQuantity(value.to_string()))
}

/// Formats a block number as a `0x`-prefixed hex quantity.
pub fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

impl RpcClient {
    /// Calls `eth_getTransactionReceipt`. `None` means the transaction has
    /// not been mined or indexed yet.
    pub async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, RpcClientError> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    /// Calls `eth_getCode` for `address` at the given block tag.
    pub async fn code_at(&self, address: &str, block: &str) -> Result<String, RpcClientError> {
        self.call("eth_getCode", json!([address, block])).await
    }

    /// Calls `eth_blockNumber`.
    pub async fn block_number(&self) -> Result<u64, RpcClientError> {
        let number: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&number)
    }

    /// Resolves a block tag to a concrete block number. Numeric tags pass
    /// through without a round trip; symbolic tags are pinned against the
    /// chain head via a header lookup.
    pub async fn resolve_block_tag(&self, tag: &Value) -> Result<u64, RpcClientError> {
        if let Value::String(text) = tag
            && let Ok(number) = parse_quantity(text)
        {
            return Ok(number);
        }

        let header: Option<BlockHeader> =
            self.call("eth_getBlockByNumber", json!([tag, false])).await?;

        match header {
            Some(header) => parse_quantity(&header.number),
            // Some nodes return no header for "pending"; the chain head is
            // the closest observable state.
            None => self.block_number().await,
        }
    }

    /// Calls `debug_traceTransaction` with the in-VM tracer.
    pub async fn debug_trace_transaction(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TraceHits>, RpcClientError> {
        self.call(
            "debug_traceTransaction",
            json!([tx_hash, tracer_options()]),
        )
        .await
    }

    /// Calls `debug_traceCall` with the in-VM tracer, against a pinned block
    /// number.
    pub async fn debug_trace_call(
        &self,
        call: &Value,
        block_number: u64,
    ) -> Result<Option<TraceHits>, RpcClientError> {
        self.call(
            "debug_traceCall",
            json!([call, quantity(block_number), tracer_options()]),
        )
        .await
    }
}
