//! MCP protocol integration tests.
//!
//! These tests spawn the `ksync mcp` process and talk line-delimited
//! JSON-RPC to it over stdio.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use tempfile::TempDir;

/// JSON-RPC 2.0 request
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// JSON-RPC 2.0 response
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct JsonRpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

struct McpTestClient {
    child: Child,
    request_id: u64,
    reader: BufReader<std::process::ChildStdout>,
    _home: TempDir,
}

impl McpTestClient {
    /// Spawn a server with its own database and config directory.
    fn spawn() -> Self {
        let home = tempfile::tempdir().expect("Failed to create temp dir");

        let mut child = Command::new(env!("CARGO_BIN_EXE_ksync"))
            .arg("mcp")
            .env("KSYNC_DB_PATH", home.path().join("ksync.db"))
            .env("XDG_CONFIG_HOME", home.path())
            .env("HOME", home.path())
            .env_remove("KSYNC_EXCLUDE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn ksync mcp");

        let stdout = child.stdout.take().expect("Failed to get stdout");

        Self {
            child,
            request_id: 0,
            reader: BufReader::new(stdout),
            _home: home,
        }
    }

    fn send_message(&mut self, content: &str) {
        let stdin = self.child.stdin.as_mut().expect("Failed to get stdin");
        writeln!(stdin, "{}", content).expect("Failed to write message");
        stdin.flush().expect("Failed to flush stdin");
    }

    fn read_message(&mut self) -> String {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .expect("Failed to read line");
        line.trim().to_string()
    }

    fn request(&mut self, method: &str, params: Option<Value>) -> JsonRpcResponse {
        self.request_id += 1;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id,
            method: method.to_string(),
            params,
        };

        let request_json = serde_json::to_string(&request).expect("Failed to serialize request");
        self.send_message(&request_json);

        let response_json = self.read_message();
        serde_json::from_str(&response_json).expect("Failed to parse response")
    }

    /// Send initialize and the initialized notification.
    fn initialize(&mut self) -> JsonRpcResponse {
        let response = self.request(
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "test-client",
                    "version": "1.0.0"
                }
            })),
        );

        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        self.send_message(&notification.to_string());

        response
    }

    fn list_tools(&mut self) -> JsonRpcResponse {
        self.request("tools/list", None)
    }

    fn call_tool(&mut self, name: &str, arguments: Value) -> JsonRpcResponse {
        self.request(
            "tools/call",
            Some(json!({
                "name": name,
                "arguments": arguments
            })),
        )
    }

    /// Call a tool and parse the JSON text it returns.
    fn call_tool_json(&mut self, name: &str, arguments: Value) -> Value {
        let response = self.call_tool(name, arguments);
        assert!(response.error.is_none(), "{} failed: {:?}", name, response.error);
        let result = response.result.expect("Expected result");
        let text = result["content"][0]["text"]
            .as_str()
            .expect("Expected text content");
        serde_json::from_str(text).expect("Tool output is not JSON")
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn project_tree() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write(dir.path(), "README.md", "# Billing");
    write(dir.path(), "src/invoice.py", "def invoice(): ...");
    dir
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

// ============================================================
// Protocol Tests
// ============================================================

mod protocol {
    use super::*;

    #[test]
    fn initialize_returns_server_info() {
        let mut client = McpTestClient::spawn();
        let response = client.initialize();

        assert!(response.error.is_none(), "Expected success, got error");
        let result = response.result.expect("Expected result");

        assert_eq!(result["serverInfo"]["name"], "knowledge-sync");
        assert!(result.get("capabilities").is_some());
    }

    #[test]
    fn tools_list_returns_all_tools() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.list_tools();
        assert!(response.error.is_none(), "Expected success, got error");

        let result = response.result.expect("Expected result");
        let tools = result["tools"].as_array().expect("Tools should be array");

        let mut tool_names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t.get("name").and_then(|n| n.as_str()))
            .collect();
        tool_names.sort();

        assert_eq!(
            tool_names,
            vec![
                "drop_project",
                "get_project_status",
                "list_projects",
                "preview_reconciliation",
                "rebuild_project",
                "reconcile_project",
            ]
        );
    }

    #[test]
    fn tools_have_descriptions_and_schemas() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.list_tools();
        let result = response.result.expect("Expected result");
        let tools = result["tools"].as_array().expect("Tools should be array");

        for tool in tools {
            let name = tool.get("name").and_then(|n| n.as_str()).unwrap_or("?");
            assert!(
                tool.get("description").is_some(),
                "Tool {} missing description",
                name
            );
            assert!(
                tool.get("inputSchema").is_some(),
                "Tool {} missing inputSchema",
                name
            );
        }
    }
}

// ============================================================
// Tool Call Tests
// ============================================================

mod tool_calls {
    use super::*;

    #[test]
    fn reconcile_then_preview_is_empty() {
        let tree = project_tree();
        let root = tree.path().to_str().unwrap();
        let mut client = McpTestClient::spawn();
        client.initialize();

        let result = client.call_tool_json(
            "reconcile_project",
            json!({ "project_id": "billing", "root": root }),
        );
        assert_eq!(result["added"], json!(["README.md", "src/invoice.py"]));
        assert_eq!(result["generation"], 1);

        let plan = client.call_tool_json(
            "preview_reconciliation",
            json!({ "project_id": "billing", "root": root }),
        );
        assert_eq!(plan["to_add"], json!([]));
        assert_eq!(plan["unchanged_count"], 2);
    }

    #[test]
    fn status_reflects_drop() {
        let tree = project_tree();
        let root = tree.path().to_str().unwrap();
        let mut client = McpTestClient::spawn();
        client.initialize();

        client.call_tool_json(
            "reconcile_project",
            json!({ "project_id": "billing", "root": root }),
        );
        let status = client.call_tool_json("get_project_status", json!({ "project_id": "billing" }));
        assert_eq!(status["state"], "ingested");
        assert_eq!(status["file_count"], 2);

        client.call_tool_json("drop_project", json!({ "project_id": "billing" }));
        let status = client.call_tool_json("get_project_status", json!({ "project_id": "billing" }));
        assert_eq!(status["state"], "uninitialized");
    }

    #[test]
    fn relative_root_is_rejected() {
        let mut client = McpTestClient::spawn();
        client.initialize();

        let response = client.call_tool(
            "reconcile_project",
            json!({ "project_id": "billing", "root": "relative/path" }),
        );

        assert!(response.error.is_some(), "Expected error for relative root");
    }
}
