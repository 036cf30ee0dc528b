// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The static set of tool descriptors (spec §4.2). A compile-time array is
//! the single source of truth for both the model-facing payload and the
//! executor's dispatch key.

use twiddle_sandbox::Permission;

use crate::tool::{ToolKind, ToolParameter, ToolSchema};

const LIST_DIRECTORY_PARAMS: &[ToolParameter] = &[
    ToolParameter {
        name: "path",
        description: "Directory to list, relative to the sandbox root. Defaults to the root itself.",
        json_type: "string",
        required: false,
    },
    ToolParameter {
        name: "depth",
        description: "How many levels to recurse (1-5). Defaults to 1.",
        json_type: "integer",
        required: false,
    },
    ToolParameter {
        name: "limit",
        description: "Maximum entries to return. Defaults to 200.",
        json_type: "integer",
        required: false,
    },
];

const READ_FILE_PARAMS: &[ToolParameter] = &[
    ToolParameter {
        name: "file_path",
        description: "File to read, relative to the sandbox root.",
        json_type: "string",
        required: true,
    },
    ToolParameter {
        name: "mode",
        description: "\"slice\" for a line range, \"indentation\" for a structural slice anchored at a line.",
        json_type: "string",
        required: false,
    },
    ToolParameter {
        name: "offset",
        description: "1-based starting line for slice mode, or the default anchor for indentation mode.",
        json_type: "integer",
        required: false,
    },
    ToolParameter {
        name: "limit",
        description: "Maximum lines to return.",
        json_type: "integer",
        required: false,
    },
    ToolParameter {
        name: "anchor_line",
        description: "1-based line to anchor indentation mode on.",
        json_type: "integer",
        required: false,
    },
    ToolParameter {
        name: "max_levels",
        description: "Indentation levels of context to expand to (0 = unbounded).",
        json_type: "integer",
        required: false,
    },
    ToolParameter {
        name: "include_siblings",
        description: "Whether to include sibling statements at the anchor's own indent level.",
        json_type: "boolean",
        required: false,
    },
    ToolParameter {
        name: "include_header",
        description: "Whether to pull in a leading header comment above the enclosing block.",
        json_type: "boolean",
        required: false,
    },
];

const SEARCH_PARAMS: &[ToolParameter] = &[
    ToolParameter {
        name: "pattern",
        description: "Search pattern (regex for ripgrep, structural pattern for ast-grep).",
        json_type: "string",
        required: true,
    },
    ToolParameter {
        name: "engine",
        description: "\"ripgrep\" (default) or \"ast-grep\".",
        json_type: "string",
        required: false,
    },
    ToolParameter {
        name: "paths",
        description: "Sandbox-relative roots to search. Defaults to the sandbox root.",
        json_type: "array",
        required: false,
    },
    ToolParameter {
        name: "include_globs",
        description: "Glob patterns a file must match.",
        json_type: "array",
        required: false,
    },
    ToolParameter {
        name: "exclude_globs",
        description: "Glob patterns to exclude.",
        json_type: "array",
        required: false,
    },
    ToolParameter {
        name: "case_sensitive",
        description: "Defaults to true.",
        json_type: "boolean",
        required: false,
    },
    ToolParameter {
        name: "regex",
        description: "Treat `pattern` as a regex (ripgrep only). Defaults to false.",
        json_type: "boolean",
        required: false,
    },
    ToolParameter {
        name: "context_before",
        description: "Lines of context before each match (0-10).",
        json_type: "integer",
        required: false,
    },
    ToolParameter {
        name: "context_after",
        description: "Lines of context after each match (0-10).",
        json_type: "integer",
        required: false,
    },
    ToolParameter {
        name: "limit",
        description: "Maximum matches to return (1-2000, default 200).",
        json_type: "integer",
        required: false,
    },
    ToolParameter {
        name: "ast_language",
        description: "Language hint for ast-grep.",
        json_type: "string",
        required: false,
    },
];

const APPLY_PATCH_PARAMS: &[ToolParameter] = &[
    ToolParameter {
        name: "input",
        description: "The patch text, framed by `*** Begin Patch` / `*** End Patch`.",
        json_type: "string",
        required: true,
    },
    ToolParameter {
        name: "workdir",
        description: "Base directory for relative paths in the patch. Defaults to the sandbox root.",
        json_type: "string",
        required: false,
    },
];

/// The four tools this agent exposes, in the order advertised to the model.
pub static TOOL_SCHEMAS: &[ToolSchema] = &[
    ToolSchema {
        id: "list_directory",
        kind: ToolKind::ListDirectory,
        summary: "List directory contents under the sandbox root.",
        required_permission: Permission::ReadOnly,
        parameters: LIST_DIRECTORY_PARAMS,
    },
    ToolSchema {
        id: "read_file",
        kind: ToolKind::ReadFile,
        summary: "Read a line range or an indentation-anchored structural slice of a file.",
        required_permission: Permission::ReadOnly,
        parameters: READ_FILE_PARAMS,
    },
    ToolSchema {
        id: "search",
        kind: ToolKind::Search,
        summary: "Search the sandbox with ripgrep or ast-grep.",
        required_permission: Permission::ReadOnly,
        parameters: SEARCH_PARAMS,
    },
    ToolSchema {
        id: "apply_patch",
        kind: ToolKind::ApplyPatch,
        summary: "Apply a structured add/delete/update patch to the sandbox.",
        required_permission: Permission::WorkspaceWrite,
        parameters: APPLY_PATCH_PARAMS,
    },
];

/// Linear scan — the registry never exceeds 4 entries (spec §4.2).
pub fn find(id: &str) -> Option<&'static ToolSchema> {
    TOOL_SCHEMAS.iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_every_registered_tool() {
        for schema in TOOL_SCHEMAS {
            assert!(find(schema.id).is_some());
        }
    }

    #[test]
    fn unknown_id_returns_none() {
        assert!(find("shell").is_none());
    }

    #[test]
    fn apply_patch_requires_workspace_write() {
        let schema = find("apply_patch").unwrap();
        assert_eq!(schema.required_permission, Permission::WorkspaceWrite);
    }

    #[test]
    fn parameters_json_lists_required_fields() {
        let schema = find("read_file").unwrap();
        let params = schema.parameters_json();
        assert_eq!(params["required"][0], "file_path");
        assert!(params["properties"]["mode"].is_object());
    }
}
