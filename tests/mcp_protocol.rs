//! JSON-RPC conversation with the MCP server over in-memory pipes

mod common;

use common::{tools, FakeSynth};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};
use voice_mcp::mcp::McpServer;
use voice_mcp::readiness::ReadinessTracker;

/// Feed `requests` as stdin lines and collect every response line
async fn converse(server: &McpServer, requests: &[&str]) -> Vec<Value> {
    let input = requests.join("\n") + "\n";
    let (writer, mut reader) = tokio::io::duplex(1 << 20);

    server
        .serve(BufReader::new(input.as_bytes()), writer)
        .await
        .unwrap();

    let mut output = String::new();
    reader.read_to_string(&mut output).await.unwrap();
    output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn by_id(responses: &[Value], id: i64) -> &Value {
    responses
        .iter()
        .find(|r| r["id"] == json!(id))
        .unwrap_or_else(|| panic!("no response with id {}", id))
}

fn server_with(readiness: Arc<ReadinessTracker>) -> (McpServer, Arc<FakeSynth>) {
    let synth = Arc::new(FakeSynth::default());
    let surface = tools(readiness, synth.clone());
    (McpServer::new(Arc::new(surface)), synth)
}

#[tokio::test]
async fn handshake_and_listings() {
    let (server, _) = server_with(Arc::new(ReadinessTracker::new()));
    let responses = converse(
        &server,
        &[
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test","version":"0"}}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"prompts/list"}"#,
            r#"{"jsonrpc":"2.0","id":4,"method":"prompts/get","params":{"name":"speak"}}"#,
            r#"{"jsonrpc":"2.0","id":5,"method":"ping"}"#,
        ],
    )
    .await;

    // The notification gets no response
    assert_eq!(responses.len(), 5);

    let init = &by_id(&responses, 1)["result"];
    assert_eq!(init["protocolVersion"], "2024-11-05");
    assert_eq!(init["serverInfo"]["name"], "voice-mcp");
    assert!(init["capabilities"]["tools"].is_object());

    let tools = by_id(&responses, 2)["result"]["tools"].as_array().unwrap();
    let mut names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        [
            "get_hotkey_status",
            "get_loading_status",
            "speak",
            "start_hotkey_monitoring",
            "stop_hotkey_monitoring"
        ]
    );
    let speak = tools.iter().find(|t| t["name"] == "speak").unwrap();
    assert_eq!(speak["inputSchema"]["required"], json!(["text"]));

    let prompts = &by_id(&responses, 3)["result"]["prompts"];
    assert_eq!(prompts[0]["name"], "speak");

    let prompt = &by_id(&responses, 4)["result"];
    let text = prompt["messages"][0]["content"]["text"].as_str().unwrap();
    assert!(text.contains("speak("));

    assert_eq!(by_id(&responses, 5)["result"], json!({}));
}

#[tokio::test]
async fn tool_calls_report_status_and_errors() {
    let readiness = Arc::new(ReadinessTracker::new());
    readiness.register("stt").unwrap();
    readiness.mark_loading("stt").unwrap();
    let (server, synth) = server_with(readiness);

    let responses = converse(
        &server,
        &[
            r#"{"jsonrpc":"2.0","id":10,"method":"tools/call","params":{"name":"get_loading_status","arguments":{}}}"#,
            r#"{"jsonrpc":"2.0","id":11,"method":"tools/call","params":{"name":"speak","arguments":{"text":"Tests are green"}}}"#,
            r#"{"jsonrpc":"2.0","id":12,"method":"tools/call","params":{"name":"speak","arguments":{"text":"   "}}}"#,
            r#"{"jsonrpc":"2.0","id":13,"method":"tools/call","params":{"name":"stop_hotkey_monitoring"}}"#,
            r#"{"jsonrpc":"2.0","id":14,"method":"tools/call","params":{"name":"start_hotkey_monitoring","arguments":{}}}"#,
            r#"{"jsonrpc":"2.0","id":15,"method":"tools/call","params":{"name":"get_hotkey_status"}}"#,
        ],
    )
    .await;
    assert_eq!(responses.len(), 6);

    let loading = &by_id(&responses, 10)["result"];
    assert_eq!(loading["isError"], false);
    let report: Value =
        serde_json::from_str(loading["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(report["components"]["stt"]["status"], "loading");
    assert_eq!(report["summary"]["all_ready"], false);
    assert_eq!(report["summary"]["loading"], 1);

    let spoke = &by_id(&responses, 11)["result"];
    assert_eq!(spoke["isError"], false);
    assert_eq!(spoke["content"][0]["text"], "✅ Spoke: Tests are green");
    assert_eq!(*synth.spoken.lock().unwrap(), ["Tests are green"]);

    let empty = &by_id(&responses, 12)["result"];
    assert_eq!(empty["isError"], true);
    assert_eq!(empty["content"][0]["text"], "❌ No text provided to speak");

    let stopped = &by_id(&responses, 13)["result"];
    assert_eq!(stopped["isError"], false);
    assert_eq!(
        stopped["content"][0]["text"],
        "✅ Hotkey monitoring was not active"
    );

    // The test hook refuses to install, like a host without input access
    let started = &by_id(&responses, 14)["result"];
    assert_eq!(started["isError"], true);
    assert!(started["content"][0]["text"]
        .as_str()
        .unwrap()
        .starts_with("❌ Failed to start hotkey monitoring"));

    let status: Value = serde_json::from_str(
        by_id(&responses, 15)["result"]["content"][0]["text"]
            .as_str()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(status["active"], false);
    assert_eq!(status["hotkey_name"], "menu");
    assert_eq!(status["configuration"]["output_mode"], "typing");
}

#[tokio::test]
async fn protocol_errors() {
    let (server, _) = server_with(Arc::new(ReadinessTracker::new()));
    let responses = converse(
        &server,
        &[
            r#"{"jsonrpc":"2.0","id":20,"method":"resources/list"}"#,
            r#"{"jsonrpc":"2.0","id":21,"method":"tools/call","params":{"name":"dance","arguments":{}}}"#,
            r#"{"jsonrpc":"2.0","id":22,"method":"tools/call","params":{"name":"speak","arguments":{"text":42}}}"#,
            r#"{"jsonrpc":"2.0","id":23,"method":"tools/call","params":{"name":"speak","arguments":{"text":"hi","volume":3}}}"#,
            r#"{"jsonrpc":"2.0","id":24,"method":"prompts/get","params":{"name":"nope"}}"#,
            r#"{"jsonrpc":"2.0","method":"unheard/notification"}"#,
            "{this is not json",
        ],
    )
    .await;
    assert_eq!(responses.len(), 6);

    assert_eq!(by_id(&responses, 20)["error"]["code"], -32601);
    assert_eq!(by_id(&responses, 21)["error"]["code"], -32602);
    assert!(by_id(&responses, 21)["error"]["message"]
        .as_str()
        .unwrap()
        .contains("dance"));
    assert_eq!(by_id(&responses, 22)["error"]["code"], -32602);

    // Out-of-range values are a tool error, not a protocol error
    let volume = &by_id(&responses, 23)["result"];
    assert_eq!(volume["isError"], true);
    assert!(volume["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("Invalid volume"));

    assert_eq!(by_id(&responses, 24)["error"]["code"], -32602);

    let parse = responses
        .iter()
        .find(|r| r["id"].is_null())
        .expect("parse error response");
    assert_eq!(parse["error"]["code"], -32700);
}
