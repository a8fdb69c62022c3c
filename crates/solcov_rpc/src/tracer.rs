//! The in-VM tracer contract.
//!
//! [`TRACER`] is a script executed by the node's debug-trace API, inside the
//! VM. For every executed instruction it determines the code currently
//! running (tracking call-depth transitions and resolving CALL/CALLCODE/
//! DELEGATECALL/STATICCALL targets from the stack, ignoring CREATE frames)
//! and accumulates a per-PC execution count keyed by that code's bytecode.
//! Pushing this bookkeeping into the node turns a linear per-step log into a
//! compact aggregate, which is what keeps long call chains tractable.
//!
//! Only the script's *output format* is a contract interpreted locally; the
//! script itself is passed across the RPC boundary as an opaque constant.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};

/// Tracer-side timeout. Pathological traces can take tens of minutes; the
/// node must not cut them off early.
pub const TRACER_TIMEOUT: &str = "1200s";

/// The tracer script shipped to the node.
pub const TRACER: &str = r#"{
  hits: {},
  codes: [],
  pending: null,
  fault: function() {
  },
  step: function(log, db) {
    var depth = log.getDepth();

    if (this.codes.length === 0) {
      this.codes.push(toHex(db.getCode(log.contract.getAddress())));
    }
    if (depth > this.codes.length) {
      this.codes.push(this.pending);
    }
    while (depth < this.codes.length) {
      this.codes.pop();
    }

    var code = this.codes[this.codes.length - 1];
    if (code !== null) {
      var counts = this.hits[code];
      if (counts === undefined) {
        counts = {};
        this.hits[code] = counts;
      }
      var pc = log.getPC();
      counts[pc] = (counts[pc] || 0) + 1;
    }

    var op = log.op.toString();
    if (op === 'CALL' || op === 'CALLCODE' || op === 'DELEGATECALL' || op === 'STATICCALL') {
      this.pending = toHex(db.getCode(toAddress(log.stack.peek(1).toString(16))));
    } else if (op === 'CREATE' || op === 'CREATE2') {
      this.pending = null;
    }
  },
  result: function() {
    return this.hits;
  }
}"#;

/// The tracer's output: per-PC execution counts keyed by the executing
/// code's bytecode hex. PC keys arrive as decimal strings.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct TraceHits(pub HashMap<String, HashMap<String, u64>>);

impl TraceHits {
    /// Iterates `(bytecode hex, pc, count)` over all recorded hits,
    /// skipping PC keys that are not decimal numbers.
    pub fn flattened(&self) -> impl Iterator<Item = (&str, usize, u64)> {
        self.0.iter().flat_map(|(code, counts)| {
            counts.iter().filter_map(move |(pc, count)| {
                pc.parse().ok().map(|pc| (code.as_str(), pc, *count))
            })
        })
    }
}

/// The tracer parameter object of a `debug_traceTransaction`/
/// `debug_traceCall` request.
pub(crate) fn tracer_options() -> Value {
    json!({
        "tracer": TRACER,
        "timeout": TRACER_TIMEOUT,
    })
}
