//! Draft tools: sandboxed file access for agents.
//!
//! When the call carries a task id, writes land in `tasks/<task_id>` under
//! the sandbox root. Reads look in the task directory first and fall back to
//! the shared root, so a task can build on drafts it did not create.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{SandboxError, ToolError};
use crate::sandbox::{Patch, Sandbox};
use crate::tools::tool::{Tool, ToolContext, ToolOutput, optional_str, require_str};

/// The sandbox a call writes to.
fn write_scope(sandbox: &Sandbox, ctx: &ToolContext) -> Result<Sandbox, ToolError> {
    match ctx.task_id.as_deref() {
        Some(task_id) => Ok(sandbox.task_scoped(task_id)?),
        None => Ok(sandbox.clone()),
    }
}

/// Read from the task scope, falling back to the shared root.
async fn read_scoped(
    sandbox: &Sandbox,
    ctx: &ToolContext,
    path: &str,
) -> Result<String, SandboxError> {
    if let Some(task_id) = ctx.task_id.as_deref() {
        let scoped = sandbox.task_scoped(task_id)?;
        match scoped.read(path).await {
            Err(SandboxError::NotFound { .. }) => {}
            other => return other,
        }
    }
    sandbox.read(path).await
}

/// Tool for reading a draft.
pub struct DraftReadTool {
    sandbox: Arc<Sandbox>,
}

impl DraftReadTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for DraftReadTool {
    fn name(&self) -> &str {
        "draft_read"
    }

    fn description(&self) -> &str {
        "Read a text file from the draft sandbox. Paths are relative to the sandbox root."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the sandbox root"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let path = require_str(&params, "path")?;
        let content = read_scoped(&self.sandbox, ctx, path).await?;

        Ok(ToolOutput::success(
            serde_json::json!({
                "path": path,
                "content": content,
                "lines": content.lines().count(),
            }),
            start.elapsed(),
        ))
    }

    fn read_only(&self) -> bool {
        true
    }
}

/// Tool for writing a draft.
pub struct DraftWriteTool {
    sandbox: Arc<Sandbox>,
}

impl DraftWriteTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for DraftWriteTool {
    fn name(&self) -> &str {
        "draft_write"
    }

    fn description(&self) -> &str {
        "Create or replace a text file in the draft sandbox. The write is atomic: \
         readers see either the old or the new content, never a mix."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the sandbox root"
                },
                "content": {
                    "type": "string",
                    "description": "Full new file content"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let path = require_str(&params, "path")?;
        let content = require_str(&params, "content")?;

        let scope = write_scope(&self.sandbox, ctx)?;
        scope.write(path, content).await?;

        Ok(ToolOutput::success(
            serde_json::json!({
                "path": path,
                "bytes_written": content.len(),
                "task_id": ctx.task_id,
            }),
            start.elapsed(),
        ))
    }
}

/// Tool for listing drafts.
pub struct DraftListTool {
    sandbox: Arc<Sandbox>,
}

impl DraftListTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for DraftListTool {
    fn name(&self) -> &str {
        "draft_list"
    }

    fn description(&self) -> &str {
        "List files and directories in the draft sandbox."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory relative to the sandbox root (default: root)"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let path = optional_str(&params, "path");

        let scope = write_scope(&self.sandbox, ctx)?;
        let entries = scope.list(path).await?;

        Ok(ToolOutput::success(
            serde_json::json!({
                "path": path.unwrap_or("."),
                "count": entries.len(),
                "entries": entries,
            }),
            start.elapsed(),
        ))
    }

    fn read_only(&self) -> bool {
        true
    }
}

/// Tool for line-range edits.
pub struct DraftPatchTool {
    sandbox: Arc<Sandbox>,
}

impl DraftPatchTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for DraftPatchTool {
    fn name(&self) -> &str {
        "draft_patch"
    }

    fn description(&self) -> &str {
        "Replace line ranges in an existing draft. Lines are 1-based and ranges are \
         inclusive; ranges must not overlap. An empty content deletes the range."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the sandbox root"
                },
                "patches": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "start_line": { "type": "integer", "minimum": 1 },
                            "end_line": { "type": "integer", "minimum": 1 },
                            "content": { "type": "string" }
                        },
                        "required": ["start_line", "end_line"]
                    }
                }
            },
            "required": ["path", "patches"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let path = require_str(&params, "path")?;
        let patches: Vec<Patch> = params
            .get("patches")
            .cloned()
            .ok_or_else(|| ToolError::InvalidParameters("missing 'patches' parameter".to_string()))
            .and_then(|v| {
                serde_json::from_value(v)
                    .map_err(|e| ToolError::InvalidParameters(format!("invalid patches: {}", e)))
            })?;

        // A task patching a shared draft works on its own copy.
        let patched = match ctx.task_id.as_deref() {
            Some(task_id) => {
                self.sandbox
                    .task_scoped(task_id)?
                    .apply_patches_seeded(path, &patches, &self.sandbox)
                    .await?
            }
            None => self.sandbox.apply_patches(path, &patches).await?,
        };

        Ok(ToolOutput::success(
            serde_json::json!({
                "path": path,
                "patches_applied": patches.len(),
                "lines": patched.lines().count(),
            }),
            start.elapsed(),
        ))
    }
}
