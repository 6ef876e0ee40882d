//! Execution context: the name -> value map that flows through one run.
//!
//! Seeded from the execution's `input_data` and extended with every prior
//! node's output keyed by node name. The context is the data surface
//! expressions evaluate against and the payload serialized into
//! `output_data` when the execution terminates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum serialized size of a single node output (1 MB). Larger outputs
/// are replaced by a truncation marker so the context stays bounded.
pub const MAX_NODE_OUTPUT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Mutable state accumulated across one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Seed values from the execution's `input_data`. A non-object seed is
    /// stored under the `"input"` key.
    pub input: Value,
    /// Node results keyed by node name, in execution order.
    pub node_outputs: HashMap<String, Value>,
    /// Workflow name (for expression access and logging).
    pub workflow_name: String,
    /// Externally addressable execution handle.
    pub execution_id: String,
}

impl ExecutionContext {
    pub fn new(workflow_name: String, execution_id: String, input: Value) -> Self {
        let input = match input {
            Value::Object(_) => input,
            other => json!({ "input": other }),
        };
        Self {
            input,
            node_outputs: HashMap::new(),
            workflow_name,
            execution_id,
        }
    }

    /// Record a node's result under its name.
    ///
    /// Oversized outputs are replaced with a truncation marker rather than
    /// rejected; downstream nodes still see that the node ran.
    pub fn insert_node_output(&mut self, node_name: &str, output: Value) {
        let size = serde_json::to_string(&output).map(|s| s.len()).unwrap_or(0);
        if size > MAX_NODE_OUTPUT_SIZE {
            tracing::warn!(
                node_name,
                size,
                max = MAX_NODE_OUTPUT_SIZE,
                "node output exceeds size limit, truncating"
            );
            self.node_outputs.insert(
                node_name.to_string(),
                json!({
                    "_truncated": true,
                    "_original_size": size,
                }),
            );
        } else {
            self.node_outputs.insert(node_name.to_string(), output);
        }
    }

    /// Get a node's recorded output.
    pub fn node_output(&self, node_name: &str) -> Option<&Value> {
        self.node_outputs.get(node_name)
    }

    /// Build the JSON object expressions evaluate against.
    ///
    /// Shape: the input object's keys at the top level, prior node outputs
    /// under `nodes.<name>`, and execution metadata under `execution`:
    /// ```json
    /// {
    ///   "instituteId": "...",          // from input_data
    ///   "payload": { ... },            // from input_data
    ///   "nodes": { "<node name>": <result map>, ... },
    ///   "execution": { "id": "...", "workflow": "..." }
    /// }
    /// ```
    pub fn to_expression_context(&self) -> Value {
        let mut root = match &self.input {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };

        let mut nodes = serde_json::Map::new();
        for (name, output) in &self.node_outputs {
            nodes.insert(name.clone(), output.clone());
        }
        root.insert("nodes".to_string(), Value::Object(nodes));
        root.insert(
            "execution".to_string(),
            json!({
                "id": self.execution_id,
                "workflow": self.workflow_name,
            }),
        );

        Value::Object(root)
    }

    /// Serialize the full context for `output_data`.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(json!({}))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_context() -> ExecutionContext {
        ExecutionContext::new(
            "fee-reminder".to_string(),
            "wx-001".to_string(),
            json!({ "instituteId": "inst-1", "payload": { "studentId": "s-42" } }),
        )
    }

    #[test]
    fn test_new_wraps_non_object_input() {
        let ctx = ExecutionContext::new(
            "wf".to_string(),
            "wx-002".to_string(),
            json!("raw seed"),
        );
        assert_eq!(ctx.input, json!({ "input": "raw seed" }));
    }

    #[test]
    fn test_insert_and_get_node_output() {
        let mut ctx = test_context();
        ctx.insert_node_output("fetch-defaulters", json!({"statusCode": 200}));
        assert_eq!(
            ctx.node_output("fetch-defaulters"),
            Some(&json!({"statusCode": 200}))
        );
        assert_eq!(ctx.node_output("missing"), None);
    }

    #[test]
    fn test_expression_context_shape() {
        let mut ctx = test_context();
        ctx.insert_node_output("fetch", json!({"body": {"count": 3}}));

        let expr_ctx = ctx.to_expression_context();
        assert_eq!(expr_ctx["instituteId"], "inst-1");
        assert_eq!(expr_ctx["payload"]["studentId"], "s-42");
        assert_eq!(expr_ctx["nodes"]["fetch"]["body"]["count"], 3);
        assert_eq!(expr_ctx["execution"]["workflow"], "fee-reminder");
        assert_eq!(expr_ctx["execution"]["id"], "wx-001");
    }

    #[test]
    fn test_oversized_output_truncated() {
        let mut ctx = test_context();
        let big = "x".repeat(MAX_NODE_OUTPUT_SIZE + 100);
        ctx.insert_node_output("big", json!(big));

        let output = ctx.node_output("big").unwrap();
        assert_eq!(output["_truncated"], json!(true));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut ctx = test_context();
        ctx.insert_node_output("fetch", json!("done"));

        let value = ctx.to_json();
        let restored: ExecutionContext = serde_json::from_value(value).unwrap();
        assert_eq!(restored.workflow_name, "fee-reminder");
        assert_eq!(restored.node_output("fetch"), Some(&json!("done")));
    }
}
