//! End-to-end exercises of the proxy against a stub upstream node.

use std::{net::SocketAddr, sync::Arc};

use axum::{Json, Router, routing::post};
use serde_json::{Value, json};
use solcov_proxy::{AppState, Config, serve_on};

const TX_HASH: &str = "0xdeadbeef";
const DEPLOYED: &str = "0x600100";

/// Answers the upstream methods the proxy issues during a trace run.
async fn upstream_rpc(Json(request): Json<Value>) -> Json<Value> {
    let id = request["id"].clone();
    let result = match request["method"].as_str().unwrap_or_default() {
        "eth_sendRawTransaction" => json!(TX_HASH),
        "eth_getTransactionReceipt" => json!({
            "transactionHash": TX_HASH,
            "to": "0x000000000000000000000000000000000000c0de",
            "blockNumber": "0x10",
        }),
        // The tracer output: per-PC hit counts keyed by executing bytecode.
        "debug_traceTransaction" => json!({ DEPLOYED: { "0": 2 } }),
        "debug_traceCall" => json!({ DEPLOYED: { "2": 1 } }),
        "eth_getBlockByNumber" => json!({ "number": "0x10" }),
        "eth_blockNumber" => json!("0x10"),
        _ => Value::Null,
    };

    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

async fn start_stub_upstream() -> SocketAddr {
    let router = Router::new().route("/", post(upstream_rpc));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// One artifact: `PUSH1 0x01, STOP`, PC 0 on line 3 and PC 2 on line 4.
fn write_artifact(dir: &std::path::Path) {
    std::fs::write(
        dir.join("Flow.json"),
        r#"{
            "contractName": "Flow",
            "deployedBytecode": "0x600100",
            "deployedSourceMap": "4:1:0:-;6:1",
            "source": "a\nb\nc\nd\n",
            "ast": {"absolutePath": "contracts/Flow.sol", "src": "0:8:0"}
        }"#,
    )
    .unwrap();
}

async fn start_proxy(artifacts_dir: &std::path::Path) -> SocketAddr {
    let upstream = start_stub_upstream().await;

    let state = Arc::new(
        AppState::new(Config {
            rpc_url: format!("http://{upstream}"),
            port: 0,
            artifacts_dir: artifacts_dir.to_path_buf(),
            fuzzy_match_factor: 0.7,
            ignore: None,
        })
        .unwrap(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        serve_on(state, listener).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn transaction_trace_reaches_the_lcov_report() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path());
    let proxy = start_proxy(dir.path()).await;
    let client = reqwest::Client::new();

    // The submission response is forwarded unmodified.
    let response: Value = client
        .post(format!("http://{proxy}"))
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"eth_sendRawTransaction","params":["0xf86c"]}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["result"], TX_HASH);

    // The report drains the trace job first: PC 0 visited, PC 2 not.
    let lcov = client
        .get(format!("http://{proxy}/.lcov"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(
        lcov,
        "SF:contracts/Flow.sol\nDA:3,1\nDA:4,0\nLH:1\nLF:2\nend_of_record\n"
    );
}

#[tokio::test]
async fn call_trace_pins_the_block_and_covers_its_line() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path());
    let proxy = start_proxy(dir.path()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{proxy}"))
        .body(
            r#"{"jsonrpc":"2.0","id":1,"method":"eth_call","params":[{"to":"0x1"},"latest"]}"#,
        )
        .send()
        .await
        .unwrap();

    let report: Value = client
        .get(format!("http://{proxy}/.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // The stubbed call trace visits PC 2 only.
    assert_eq!(report["coverage"]["contracts/Flow.sol"]["3"], 0);
    assert_eq!(report["coverage"]["contracts/Flow.sol"]["4"], 1);
}

#[tokio::test]
async fn untraced_methods_are_forwarded_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path());
    let proxy = start_proxy(dir.path()).await;
    let client = reqwest::Client::new();

    let response: Value = client
        .post(format!("http://{proxy}"))
        .body(r#"{"jsonrpc":"2.0","id":9,"method":"eth_blockNumber","params":[]}"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["result"], "0x10");

    let report: Value = client
        .get(format!("http://{proxy}/.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    // Nothing was traced: both lines uncovered.
    assert_eq!(report["coverage"]["contracts/Flow.sol"]["3"], 0);
    assert_eq!(report["coverage"]["contracts/Flow.sol"]["4"], 0);
}

#[tokio::test]
async fn unknown_get_paths_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path());
    let proxy = start_proxy(dir.path()).await;
    let client = reqwest::Client::new();

    let status = client
        .get(format!("http://{proxy}/nope"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reload_rebuilds_the_registry() {
    let dir = tempfile::tempdir().unwrap();
    write_artifact(dir.path());
    let proxy = start_proxy(dir.path()).await;
    let client = reqwest::Client::new();

    let status = client
        .get(format!("http://{proxy}/reload"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::OK);

    // The reloaded registry still serves reports.
    let report: Value = client
        .get(format!("http://{proxy}/.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(report["coverage"]["contracts/Flow.sol"].is_object());
}
