//! MCP over stdio.
//!
//! JSON-RPC 2.0 framing over stdin/stdout, the `initialize` handshake and the
//! `scaffold_*` tool catalogue. Tool execution lives in the handlers module.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};

/// Name advertised in the initialize handshake.
pub const SERVER_NAME: &str = "mcp-concept-scaffolding";

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// Incoming JSON-RPC message. A missing `id` marks a notification.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outgoing JSON-RPC message. Exactly one of `result` and `error` is set.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// Echoes the request id, `null` when it could not be read.
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub tools: ToolCapabilities,
}

#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// The catalogue is fixed for the life of the process.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Answer to `initialize`.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Capabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// One entry of the `tools/list` catalogue.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON Schema the arguments must satisfy.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// `params` of a `tools/call` request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// Always `"text"`: results are pretty-printed JSON.
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// Tool outcome. Failures are reported here with `isError` rather than as
/// JSON-RPC errors, so the client can show them to the model.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Line-delimited JSON-RPC server. Requests are handled one at a time, in
/// arrival order.
pub struct McpServer {
    state: SharedState,
}

impl McpServer {
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Serve on the process's stdin and stdout.
    pub async fn run(&self) -> std::io::Result<()> {
        info!("MCP concept scaffolding server starting...");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC from `input` until EOF.
    pub async fn serve<R, W>(&self, input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(input);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            // Notifications get no response
            if let Some(response) = self.handle_line(trimmed).await {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                output.write_all(response_json.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
        }

        Ok(())
    }

    /// Parse and dispatch one raw message.
    pub async fn handle_line(&self, raw: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                error!(error = %e, "Failed to parse request");
                Some(JsonRpcResponse::error(
                    None,
                    -32700,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Handle a single JSON-RPC request. Returns None for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" => {
                debug!("Client finished initialization");
                None
            }
            "notifications/cancelled" => {
                // Requests run to completion before the next line is read
                debug!("Ignoring cancellation notice");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        let tools = tool_definitions();

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "tools": tools
            }),
        )
    }

    /// Run a tool and wrap its outcome as a tool result.
    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text: format!("Error: {}", e),
                    },
                    Some(true),
                ),
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }
}

/// Every tool exposed by the server, in listing order.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        // Session lifecycle
        get_create_session_tool(),
        get_submit_profile_tool(),
        get_start_round_tool(),
        // Map editing
        get_edit_map_tool(),
        get_replace_map_tool(),
        // Dialogue
        get_submit_utterance_tool(),
        get_finish_round_tool(),
        get_check_timer_tool(),
        // Ending and export
        get_end_session_tool(),
        get_export_session_tool(),
        get_session_status_tool(),
        // Offline analysis
        get_coverage_tool(),
        get_progress_tool(),
    ]
}

fn session_id_schema() -> Value {
    serde_json::json!({
        "type": "string",
        "description": "Session ID returned by scaffold_create_session"
    })
}

fn session_only_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "session_id": session_id_schema()
        },
        "required": ["session_id"],
        "additionalProperties": false
    })
}

fn concept_map_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "description": description,
        "properties": {
            "round": {
                "type": "integer",
                "minimum": 0
            },
            "concepts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "label": { "type": "string" }
                    },
                    "required": ["id", "label"]
                }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "source": { "type": "string" },
                        "target": { "type": "string" },
                        "label": { "type": "string" }
                    },
                    "required": ["id", "source", "target"]
                }
            },
            "last_added": {
                "type": "string",
                "description": "ID of the most recently added concept"
            }
        }
    })
}

fn get_create_session_tool() -> Tool {
    Tool {
        name: "scaffold_create_session".to_string(),
        description: "Open a scaffolding session for a participant. Fixes the agent sequence for every round and returns the session status.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "participant_id": {
                    "type": "string",
                    "description": "Participant identifier recorded in the export"
                },
                "display_name": {
                    "type": "string",
                    "description": "Optional display name"
                },
                "expert_map": concept_map_schema(
                    "Optional reference map for coverage; the server default is used when omitted"
                )
            },
            "required": ["participant_id"],
            "additionalProperties": false
        }),
    }
}

fn get_submit_profile_tool() -> Tool {
    Tool {
        name: "scaffold_submit_profile".to_string(),
        description: "Record the learner's profiling answers. Derives the background score, initial ZPD estimates and starting intensity.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "background": {
                    "type": "string",
                    "description": "Free text about prior knowledge of the task domain"
                },
                "confidence": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 5,
                    "description": "Self-rated confidence (1-5)"
                },
                "goals": {
                    "type": "string",
                    "description": "Learning goals for the session"
                },
                "condition": {
                    "type": "string",
                    "enum": ["sequenced", "reversed", "neutral"],
                    "description": "Experimental arm; replaces the agent sequence (reversed order, or the neutral control agent in every round)"
                }
            },
            "required": ["session_id", "confidence"],
            "additionalProperties": false
        }),
    }
}

fn get_start_round_tool() -> Tool {
    Tool {
        name: "scaffold_start_round".to_string(),
        description: "Open the next round. Round 0 is the unscaffolded baseline; later rounds return the scaffolding agent's opening prompt.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_edit_map_tool() -> Tool {
    Tool {
        name: "scaffold_edit_map".to_string(),
        description: "Apply a single edit to the working concept map of the active round.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "edit": {
                    "type": "object",
                    "description": "Edit operation tagged by 'op'",
                    "properties": {
                        "op": {
                            "type": "string",
                            "enum": [
                                "add_concept",
                                "remove_concept",
                                "relabel_concept",
                                "add_relationship",
                                "remove_relationship",
                                "relabel_relationship"
                            ]
                        },
                        "id": { "type": "string" },
                        "label": { "type": "string" },
                        "source": { "type": "string" },
                        "target": { "type": "string" }
                    },
                    "required": ["op", "id"]
                }
            },
            "required": ["session_id", "edit"],
            "additionalProperties": false
        }),
    }
}

fn get_replace_map_tool() -> Tool {
    Tool {
        name: "scaffold_replace_map".to_string(),
        description: "Replace the working concept map with a full snapshot. Rejected when it drops elements carried over from the previous round.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "map": concept_map_schema("Full concept map snapshot")
            },
            "required": ["session_id", "map"],
            "additionalProperties": false
        }),
    }
}

fn get_submit_utterance_tool() -> Tool {
    Tool {
        name: "scaffold_submit_utterance".to_string(),
        description: "Submit a learner message in the active round and get the scaffolding agent's reply.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": session_id_schema(),
                "text": {
                    "type": "string",
                    "description": "The learner's message"
                }
            },
            "required": ["session_id", "text"],
            "additionalProperties": false
        }),
    }
}

fn get_finish_round_tool() -> Tool {
    Tool {
        name: "scaffold_finish_round".to_string(),
        description: "Close the active round at the learner's request. Freezes the map and returns the diff, coverage and ZPD update.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_check_timer_tool() -> Tool {
    Tool {
        name: "scaffold_check_timer".to_string(),
        description: "Report the round timer and close the round when its time limit has passed.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_end_session_tool() -> Tool {
    Tool {
        name: "scaffold_end_session".to_string(),
        description: "End the session. Finalized after the last round, abandoned otherwise. Exports the session record.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_export_session_tool() -> Tool {
    Tool {
        name: "scaffold_export_session".to_string(),
        description: "Retry the export of an ended session whose previous export failed.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_session_status_tool() -> Tool {
    Tool {
        name: "scaffold_session_status".to_string(),
        description: "Current phase, round, agent sequence and map counts of a session.".to_string(),
        input_schema: session_only_schema(),
    }
}

fn get_coverage_tool() -> Tool {
    Tool {
        name: "scaffold_coverage".to_string(),
        description: "Compute node and edge coverage of a concept map against a reference map, with growth against an optional previous map.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "map": concept_map_schema("Learner concept map"),
                "reference": concept_map_schema("Reference map; the server default is used when omitted"),
                "previous": concept_map_schema("Optional earlier snapshot to diff against")
            },
            "required": ["map"],
            "additionalProperties": false
        }),
    }
}

fn get_progress_tool() -> Tool {
    Tool {
        name: "scaffold_progress".to_string(),
        description: "Longitudinal growth across an ordered list of labelled concept map snapshots.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "snapshots": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "label": { "type": "string" },
                            "map": concept_map_schema("Snapshot map")
                        },
                        "required": ["label", "map"]
                    }
                },
                "reference": concept_map_schema("Optional reference map for per-snapshot coverage")
            },
            "required": ["snapshots"],
            "additionalProperties": false
        }),
    }
}
