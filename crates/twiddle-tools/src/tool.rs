// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use twiddle_sandbox::{Permission, Sandbox};

use crate::errors::ToolError;

/// Which tool core a schema dispatches to (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ListDirectory,
    ReadFile,
    Search,
    ApplyPatch,
}

/// One parameter accepted by a tool's JSON-object arguments.
#[derive(Debug, Clone, Copy)]
pub struct ToolParameter {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON Schema primitive type name (`"string"`, `"integer"`, `"boolean"`, `"array"`).
    pub json_type: &'static str,
    pub required: bool,
}

/// A tool's static, model-facing descriptor plus the dispatch key the
/// executor uses to route invocations to a core.
#[derive(Debug, Clone, Copy)]
pub struct ToolSchema {
    pub id: &'static str,
    pub kind: ToolKind,
    pub summary: &'static str,
    pub required_permission: Permission,
    pub parameters: &'static [ToolParameter],
}

impl ToolSchema {
    /// `output_kind` is always `json_object` (spec §4.2) — every tool core
    /// returns a JSON document, never raw text.
    pub fn output_kind(&self) -> &'static str {
        "json_object"
    }

    /// Build the JSON Schema `parameters` object embedded in the request
    /// payload's tool descriptor (spec §6.1).
    pub fn parameters_json(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in self.parameters {
            properties.insert(
                p.name.to_string(),
                json!({"type": p.json_type, "description": p.description}),
            );
            if p.required {
                required.push(p.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A single tool invocation, already resolved from a finalized `ToolCall`.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// The outcome of dispatching one invocation through the executor.
#[derive(Debug, Clone)]
pub enum ToolResult {
    Success(Value),
    Failure(String),
}

/// One of the four tool cores (spec §4.6–§4.8 plus list_directory).
#[async_trait]
pub trait ToolCore: Send + Sync {
    async fn run(&self, sandbox: &Sandbox, args: &Value) -> Result<Value, ToolError>;
}
