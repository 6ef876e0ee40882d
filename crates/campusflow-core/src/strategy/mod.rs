//! Action strategy layer: pluggable executors for HTTP-shaped nodes.
//!
//! A strategy turns (context, node config) into a normalized result map --
//! never an error. Failures of any kind (bad config, network trouble, error
//! responses) become `{"error": ...}` maps so the runtime can record them
//! and apply the node's failure policy.
//!
//! - `external` -- plain HTTP calls through the `HttpTransport` seam
//! - `internal` -- credential-signed calls through `InternalServiceClient`
//! - `StrategyRegistry` -- `requestType` -> strategy dispatch, built once at
//!   startup from an explicit table

pub mod config;
pub mod external;
pub mod internal;
pub mod transport;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::expression::Evaluator;

use self::config::NodeConfig;
use self::transport::{
    HttpMethod, HttpResponseParts, HttpTransport, InternalServiceClient, RequestSpec,
};

/// Request type used when the config omits or misspells `requestType`.
pub const DEFAULT_REQUEST_TYPE: &str = "EXTERNAL";

// ---------------------------------------------------------------------------
// NodeStrategy trait
// ---------------------------------------------------------------------------

/// One implementation of "execute this node kind".
///
/// Boxed futures keep the trait object-safe so the registry can hold
/// heterogeneous strategies behind `Arc<dyn NodeStrategy>`.
pub trait NodeStrategy: Send + Sync {
    /// The registry key (`"EXTERNAL"`, `"INTERNAL"`).
    fn kind(&self) -> &'static str;

    /// Execute the node. Always resolves to a result map; errors are
    /// represented as `{"error": ...}` entries, never raised.
    fn execute<'a>(
        &'a self,
        context: &'a Value,
        config: &'a NodeConfig,
    ) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// StrategyRegistry
// ---------------------------------------------------------------------------

/// `requestType` -> strategy dispatch table.
///
/// Built once at process start from an explicit list; dispatch is a pure
/// function of the (normalized) request type.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn NodeStrategy>>,
}

impl StrategyRegistry {
    /// Build a registry from an explicit strategy table, keyed by
    /// `NodeStrategy::kind()`.
    pub fn from_table(entries: Vec<Arc<dyn NodeStrategy>>) -> Self {
        let mut strategies = HashMap::new();
        for strategy in entries {
            strategies.insert(strategy.kind().to_string(), strategy);
        }
        Self { strategies }
    }

    /// Build the standard EXTERNAL + INTERNAL table over the given seams.
    pub fn standard(
        transport: Arc<dyn HttpTransport>,
        internal_client: Arc<dyn InternalServiceClient>,
    ) -> Self {
        let evaluator = Arc::new(Evaluator::new());
        Self::from_table(vec![
            Arc::new(external::ExternalHttpStrategy::new(
                transport,
                Arc::clone(&evaluator),
            )),
            Arc::new(internal::InternalHttpStrategy::new(
                internal_client,
                evaluator,
            )),
        ])
    }

    /// Resolve a config's `requestType` to a strategy.
    ///
    /// Matching is case-insensitive; an absent or unrecognized type resolves
    /// to `EXTERNAL`. `None` means the resolved kind has no registered
    /// strategy -- the caller must treat that as a configuration error.
    pub fn resolve(&self, request_type: Option<&str>) -> Option<Arc<dyn NodeStrategy>> {
        let normalized = request_type
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| self.strategies.contains_key(s))
            .unwrap_or_else(|| DEFAULT_REQUEST_TYPE.to_string());
        self.strategies.get(&normalized).cloned()
    }
}

// ---------------------------------------------------------------------------
// Shared request building and response normalization
// ---------------------------------------------------------------------------

/// Evaluate a node config into a ready-to-send request.
///
/// Expression failures inside values fall back per the evaluator's policy;
/// only structural problems (missing url, unsupported method) error here.
pub(crate) fn build_request(
    evaluator: &Evaluator,
    context: &Value,
    config: &NodeConfig,
) -> Result<RequestSpec, String> {
    let method = match &config.method {
        Some(raw) => HttpMethod::parse(raw).ok_or_else(|| format!("unsupported method '{raw}'"))?,
        None => HttpMethod::Get,
    };

    let raw_url = config.url.as_deref().ok_or("missing url")?;
    let url = evaluator.evaluate_to_string(raw_url, context, "");
    if url.is_empty() {
        return Err(format!("url '{raw_url}' resolved to an empty string"));
    }

    let headers = config
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), evaluator.evaluate_to_string(v, context, "")))
        .collect();

    let query = config
        .query_params
        .iter()
        .map(|(k, v)| (k.clone(), evaluator.evaluate_to_string(v, context, "")))
        .collect();

    // Bodies on GET/DELETE are skipped, not an error.
    let body = match &config.body {
        Some(body) if method.allows_body() => Some(evaluator.evaluate_tree(body, context)),
        _ => None,
    };

    Ok(RequestSpec {
        method,
        url,
        headers,
        query,
        body,
    })
}

/// Normalize a transport response into the strategy result map.
///
/// - 2xx/3xx: `{statusCode, headers, body}` with the body parsed as JSON
///   when possible, raw text otherwise.
/// - 4xx: `{statusCode, error, message, responseBody?}`.
/// - 5xx: treated like a transport failure.
pub(crate) fn normalize_response(label: &str, parts: HttpResponseParts) -> Value {
    let parsed_body = serde_json::from_str::<Value>(&parts.body).ok();

    match parts.status {
        200..=399 => json!({
            "statusCode": parts.status,
            "headers": parts.headers,
            "body": parsed_body.unwrap_or(Value::String(parts.body)),
        }),
        400..=499 => {
            let mut map = json!({
                "statusCode": parts.status,
                "error": format!("HTTP {}", parts.status),
                "message": "client error response",
            });
            if let Some(body) = parsed_body {
                map["responseBody"] = body;
            }
            map
        }
        status => failure_result(label, &format!("HTTP {status}")),
    }
}

/// The catch-all error map: `{"error": "<strategy> failed: <message>"}`.
pub(crate) fn failure_result(label: &str, message: &str) -> Value {
    json!({ "error": format!("{label} failed: {message}") })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
