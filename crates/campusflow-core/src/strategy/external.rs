//! EXTERNAL strategy: plain HTTP calls against third-party services.

use std::pin::Pin;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use crate::expression::Evaluator;

use super::config::NodeConfig;
use super::transport::{HttpTransport, RequestSpec};
use super::{NodeStrategy, build_request, failure_result, normalize_response};

/// Label used in error maps produced by this strategy.
const LABEL: &str = "EXTERNAL request";

/// Executes nodes against external services over a generic HTTP client.
pub struct ExternalHttpStrategy {
    transport: Arc<dyn HttpTransport>,
    evaluator: Arc<Evaluator>,
}

impl ExternalHttpStrategy {
    pub fn new(transport: Arc<dyn HttpTransport>, evaluator: Arc<Evaluator>) -> Self {
        Self {
            transport,
            evaluator,
        }
    }

    /// Apply the config's `authentication` section as an Authorization
    /// header. Credential fields are themselves expression-evaluated.
    fn apply_authentication(
        &self,
        context: &Value,
        auth: &Value,
        spec: &mut RequestSpec,
    ) -> Result<(), String> {
        let auth_type = auth
            .get("type")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_uppercase())
            .ok_or("authentication missing type")?;

        let header = match auth_type.as_str() {
            "BASIC" => {
                let username = self.eval_auth_field(context, auth, "username")?;
                let password = self.eval_auth_field(context, auth, "password")?;
                format!(
                    "Basic {}",
                    BASE64.encode(format!("{username}:{password}"))
                )
            }
            "BEARER" => {
                let token = self.eval_auth_field(context, auth, "token")?;
                format!("Bearer {token}")
            }
            other => return Err(format!("unsupported authentication type '{other}'")),
        };

        spec.headers.push(("Authorization".to_string(), header));
        Ok(())
    }

    fn eval_auth_field(
        &self,
        context: &Value,
        auth: &Value,
        field: &str,
    ) -> Result<String, String> {
        let raw = auth
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("authentication missing {field}"))?;
        let value = self.evaluator.evaluate_to_string(raw, context, "");
        if value.is_empty() {
            return Err(format!("authentication {field} resolved empty"));
        }
        Ok(value)
    }
}

impl NodeStrategy for ExternalHttpStrategy {
    fn kind(&self) -> &'static str {
        "EXTERNAL"
    }

    fn execute<'a>(
        &'a self,
        context: &'a Value,
        config: &'a NodeConfig,
    ) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
        Box::pin(async move {
            let mut spec = match build_request(&self.evaluator, context, config) {
                Ok(spec) => spec,
                Err(msg) => return failure_result(LABEL, &msg),
            };

            if let Some(auth) = &config.authentication {
                if let Err(msg) = self.apply_authentication(context, auth, &mut spec) {
                    return failure_result(LABEL, &msg);
                }
            }

            tracing::debug!(
                method = spec.method.as_str(),
                url = spec.url.as_str(),
                "executing external node"
            );

            match self.transport.send(spec).await {
                Ok(parts) => normalize_response(LABEL, parts),
                Err(err) => failure_result(LABEL, &err.to_string()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
