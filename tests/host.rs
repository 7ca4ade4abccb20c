mod common;

use common::{config_for, mount_workspace, ok, tmp_dir, Credentials};
use serde_json::{json, Value};
use slack_bridge::app::{ApiProvider, StartupMode};
use slack_bridge::mcp::server::McpServer;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

/// Feeds `requests` plus one unparseable line; returns responses in write order.
async fn exchange(server: &Arc<McpServer>, requests: &[Value]) -> Vec<Value> {
    let mut input = String::new();
    for request in requests {
        input.push_str(&request.to_string());
        input.push('\n');
    }
    input.push_str("{not json\n\n");
    let mut output = Vec::new();
    server.serve(input.as_bytes(), &mut output).await.expect("serve");
    String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

fn by_id(responses: &[Value]) -> HashMap<String, Value> {
    responses
        .iter()
        .map(|response| (response["id"].to_string(), response.clone()))
        .collect()
}

fn text_of(response: &Value) -> String {
    response["result"]["content"][0]["text"].as_str().unwrap_or_default().to_string()
}

async fn session_host(server: &MockServer, prefix: &str) -> (Arc<ApiProvider>, Arc<McpServer>, std::path::PathBuf) {
    let dir = tmp_dir(prefix);
    let provider = ApiProvider::new(config_for(&server.uri(), Credentials::Session, &dir)).unwrap();
    provider.start(StartupMode::Blocking).await.unwrap();
    let provider = Arc::new(provider);
    let host = Arc::new(McpServer::with_provider(provider.clone()));
    (provider, host, dir)
}

#[tokio::test]
async fn stdio_host_lists_and_calls_tools() {
    let server = MockServer::start().await;
    mount_workspace(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/conversations.history"))
        .respond_with(ok(json!({"ok": false, "error": "invalid_auth"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cache/T0001/users/search"))
        .respond_with(ok(json!({"ok": true, "results": []})))
        .mount(&server)
        .await;
    let (provider, host, dir) = session_host(&server, "host").await;

    let responses = exchange(
        &host,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                   "params": {"name": "users_search", "arguments": {"query": "nobody"}}}),
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
                   "params": {"name": "channels_list", "arguments": {"channel_types": "im"}}}),
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call",
                   "params": {"name": "conversations_history", "arguments": {"channel_id": "#general"}}}),
            json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call", "params": {"name": "launch_rockets"}}),
            json!({"jsonrpc": "2.0", "id": 7, "method": "prompts/list"}),
        ],
    )
    .await;
    assert_eq!(responses.len(), 8);
    let replies = by_id(&responses);

    assert_eq!(responses[0]["id"], 1);
    assert_eq!(responses[0]["result"]["serverInfo"]["name"], "slack-bridge");
    assert_eq!(responses[0]["result"]["capabilities"]["resources"]["subscribe"], false);

    let tools = replies["2"]["result"]["tools"].as_array().expect("tools");
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(names.contains(&"channels_list"));
    assert!(names.contains(&"users_search"));
    assert!(names.contains(&"usergroups_me"));
    assert!(!names.contains(&"auth_test"));
    assert!(!names.contains(&"users_list"));
    assert!(!names.contains(&"usergroups_users_list"));
    assert!(!names.contains(&"conversations_add_message"));
    let history = tools
        .iter()
        .find(|t| t["name"] == "conversations_history")
        .expect("history tool");
    assert_eq!(history["annotations"]["readOnlyHint"], true);
    assert_eq!(history["_meta"]["rateLimitTier"], "standard");

    assert!(replies["3"]["result"].get("isError").is_none());
    assert_eq!(text_of(&replies["3"]), r#"{"users":[]}"#);

    let ims: Value = serde_json::from_str(&text_of(&replies["4"])).expect("tool payload");
    assert_eq!(ims["channels"][0]["id"], "D1");

    assert_eq!(replies["5"]["result"]["isError"], true);
    let failure = text_of(&replies["5"]);
    assert!(failure.starts_with("BridgeError"));
    assert!(failure.contains("kind: authexpired"));
    assert!(failure.contains("xoxc/xoxd"));
    assert!(!failure.contains("xoxc-test-token"));

    assert_eq!(replies["6"]["error"]["code"], -32602);
    assert_eq!(replies["7"]["error"]["code"], -32601);
    assert_eq!(replies["null"]["error"]["code"], -32700);

    provider.shutdown().await;
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn ping_is_answered_while_a_slow_tool_call_runs() {
    let server = MockServer::start().await;
    mount_workspace(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/conversations.history"))
        .respond_with(ok(json!({"ok": true, "messages": []})).set_delay(Duration::from_millis(1_500)))
        .mount(&server)
        .await;
    let (provider, host, dir) = session_host(&server, "host-concurrent").await;

    let responses = exchange(
        &host,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call",
                   "params": {"name": "conversations_history", "arguments": {"channel_id": "C1"}}}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}),
        ],
    )
    .await;
    let order: Vec<String> = responses.iter().map(|r| r["id"].to_string()).collect();
    assert_eq!(order, vec!["2", "null", "1"]);
    assert!(responses[2]["result"].get("isError").is_none());

    provider.shutdown().await;
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn directories_are_published_as_resources() {
    let server = MockServer::start().await;
    mount_workspace(&server).await;
    let (provider, host, dir) = session_host(&server, "host-resources").await;

    let responses = exchange(
        &host,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "resources/list"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "resources/read",
                   "params": {"uri": "slack://acme/channels"}}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "resources/read",
                   "params": {"uri": "slack://acme/users"}}),
            json!({"jsonrpc": "2.0", "id": 4, "method": "resources/read",
                   "params": {"uri": "slack://elsewhere/users"}}),
        ],
    )
    .await;
    let replies = by_id(&responses);

    let uris: Vec<&str> = replies["1"]["result"]["resources"]
        .as_array()
        .expect("resources")
        .iter()
        .filter_map(|r| r["uri"].as_str())
        .collect();
    assert_eq!(uris, vec!["slack://acme/channels", "slack://acme/users"]);

    let contents = &replies["2"]["result"]["contents"][0];
    assert_eq!(contents["mimeType"], "application/json");
    let channels: Value = serde_json::from_str(contents["text"].as_str().expect("text")).expect("json");
    assert_eq!(channels["channels"].as_array().map(|c| c.len()), Some(4));

    let users: Value =
        serde_json::from_str(replies["3"]["result"]["contents"][0]["text"].as_str().expect("text")).expect("json");
    assert_eq!(users["users"].as_array().map(|u| u.len()), Some(4));
    assert!(users["fetched_at"].is_string());

    assert_eq!(replies["4"]["error"]["code"], -32602);

    provider.shutdown().await;
    let _ = std::fs::remove_dir_all(dir);
}
