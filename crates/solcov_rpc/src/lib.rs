//! JSON-RPC plumbing for the upstream node: wire types, the HTTP client and
//! the in-VM debug-tracer contract.

mod client;
pub mod eth;
pub mod jsonrpc;
pub mod tracer;

pub use client::{RpcClient, RpcClientError};
