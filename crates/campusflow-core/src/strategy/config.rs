//! Node configuration model.
//!
//! The merged (template + override) JSON blob deserializes into
//! `NodeConfig`. Field names follow the stored wire format (camelCase).
//! String values anywhere in the config may embed `{{ ... }}` references;
//! they are evaluated at execution time, not here.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// Recognized fields of an HTTP-shaped node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    /// `INTERNAL` or `EXTERNAL`; absent/unrecognized resolves to EXTERNAL.
    pub request_type: Option<String>,
    /// Target URL, expression-evaluated.
    pub url: Option<String>,
    /// HTTP method; defaults to GET when absent.
    pub method: Option<String>,
    /// Header map; values expression-evaluated.
    pub headers: HashMap<String, String>,
    /// Query parameter map; values expression-evaluated.
    pub query_params: HashMap<String, String>,
    /// Arbitrary JSON body; string leaves expression-evaluated. Skipped for
    /// GET/DELETE.
    pub body: Option<Value>,
    /// `{type: BASIC|BEARER, ...}` for EXTERNAL, `{clientName}` for INTERNAL.
    pub authentication: Option<Value>,
    /// Optional per-node idempotency reservation.
    pub dedupe: Option<NodeDedupeConfig>,
}

/// Per-node dedupe settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDedupeConfig {
    /// Operation key, expression-evaluated.
    pub key: String,
    /// Optional scope partition, expression-evaluated.
    #[serde(default)]
    pub scope: Option<String>,
}

impl NodeConfig {
    /// Deserialize a merged config blob.
    pub fn from_value(config: &Value) -> Result<Self, String> {
        serde_json::from_value(config.clone())
            .map_err(|e| format!("invalid node configuration: {e}"))
    }
}
