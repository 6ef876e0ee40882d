//! INTERNAL strategy: credential-signed calls against internal services.
//!
//! Same evaluation and body-building pipeline as the EXTERNAL strategy, but
//! the config's `authentication.clientName` selects which internal service
//! credential signs the request, and the call is delegated to the
//! `InternalServiceClient` collaborator instead of a plain HTTP client.

use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::expression::Evaluator;

use super::config::NodeConfig;
use super::transport::InternalServiceClient;
use super::{NodeStrategy, build_request, failure_result, normalize_response};

/// Label used in error maps produced by this strategy.
const LABEL: &str = "INTERNAL request";

/// Executes nodes against internal services through the signing client.
pub struct InternalHttpStrategy {
    client: Arc<dyn InternalServiceClient>,
    evaluator: Arc<Evaluator>,
}

impl InternalHttpStrategy {
    pub fn new(client: Arc<dyn InternalServiceClient>, evaluator: Arc<Evaluator>) -> Self {
        Self { client, evaluator }
    }

    /// Resolve `authentication.clientName`, which may itself be an
    /// expression. Absent or empty means the node cannot run.
    fn resolve_client_name(&self, context: &Value, config: &NodeConfig) -> Option<String> {
        let raw = config
            .authentication
            .as_ref()?
            .get("clientName")?
            .as_str()?;
        let name = self.evaluator.evaluate_to_string(raw, context, "");
        (!name.is_empty()).then_some(name)
    }
}

impl NodeStrategy for InternalHttpStrategy {
    fn kind(&self) -> &'static str {
        "INTERNAL"
    }

    fn execute<'a>(
        &'a self,
        context: &'a Value,
        config: &'a NodeConfig,
    ) -> Pin<Box<dyn Future<Output = Value> + Send + 'a>> {
        Box::pin(async move {
            // Fail fast before any request building or network activity.
            let Some(client_name) = self.resolve_client_name(context, config) else {
                return json!({ "error": "INTERNAL request missing clientName" });
            };

            let spec = match build_request(&self.evaluator, context, config) {
                Ok(spec) => spec,
                Err(msg) => return failure_result(LABEL, &msg),
            };

            tracing::debug!(
                client = client_name.as_str(),
                method = spec.method.as_str(),
                url = spec.url.as_str(),
                "executing internal node"
            );

            match self.client.make_signed_request(&client_name, spec).await {
                Ok(parts) => normalize_response(LABEL, parts),
                Err(err) => failure_result(LABEL, &err.to_string()),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::transport::{
        HttpResponseParts, RequestSpec, TransportError,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Signing-client double: records the client name + request and returns
    /// a canned response.
    struct FakeSigningClient {
        response: Mutex<Option<Result<HttpResponseParts, TransportError>>>,
        last_call: Mutex<Option<(String, RequestSpec)>>,
    }

    impl FakeSigningClient {
        fn responding(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(Ok(HttpResponseParts {
                    status,
                    headers: HashMap::new(),
                    body: body.to_string(),
                }))),
                last_call: Mutex::new(None),
            })
        }

        fn failing(err: TransportError) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(Err(err))),
                last_call: Mutex::new(None),
            })
        }

        fn called(&self) -> bool {
            self.last_call.lock().unwrap().is_some()
        }
    }

    impl InternalServiceClient for FakeSigningClient {
        fn make_signed_request(
            &self,
            client_name: &str,
            spec: RequestSpec,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponseParts, TransportError>> + Send + '_>>
        {
            *self.last_call.lock().unwrap() = Some((client_name.to_string(), spec));
            let response = self.response.lock().unwrap().take().unwrap();
            Box::pin(async move { response })
        }
    }

    fn strategy(client: Arc<FakeSigningClient>) -> InternalHttpStrategy {
        InternalHttpStrategy::new(client, Arc::new(Evaluator::new()))
    }

    fn context() -> Value {
        json!({ "payload": { "studentId": "s-42" }, "serviceName": "student-service" })
    }

    #[tokio::test]
    async fn test_missing_client_name_no_network_call() {
        let client = FakeSigningClient::responding(200, "{}");
        let strategy = strategy(Arc::clone(&client));
        let config = NodeConfig::from_value(&json!({
            "requestType": "INTERNAL",
            "url": "/students"
        }))
        .unwrap();

        let result = strategy.execute(&context(), &config).await;
        assert_eq!(result["error"], "INTERNAL request missing clientName");
        assert!(!client.called());
    }

    #[tokio::test]
    async fn test_empty_resolved_client_name_rejected() {
        let client = FakeSigningClient::responding(200, "{}");
        let strategy = strategy(Arc::clone(&client));
        let config = NodeConfig::from_value(&json!({
            "url": "/students",
            "authentication": { "clientName": "{{ missing.path }}" }
        }))
        .unwrap();

        let result = strategy.execute(&context(), &config).await;
        assert_eq!(result["error"], "INTERNAL request missing clientName");
        assert!(!client.called());
    }

    #[tokio::test]
    async fn test_client_name_expression_resolved() {
        let client = FakeSigningClient::responding(200, r#"{"students":[]}"#);
        let strategy = strategy(Arc::clone(&client));
        let config = NodeConfig::from_value(&json!({
            "url": "/students/{{ payload.studentId }}",
            "authentication": { "clientName": "{{ serviceName }}" }
        }))
        .unwrap();

        let result = strategy.execute(&context(), &config).await;
        assert_eq!(result["statusCode"], 200);

        let (name, spec) = client.last_call.lock().unwrap().clone().unwrap();
        assert_eq!(name, "student-service");
        assert_eq!(spec.url, "/students/s-42");
    }

    #[tokio::test]
    async fn test_unknown_client_error_map() {
        let client =
            FakeSigningClient::failing(TransportError::UnknownClient("ghost".to_string()));
        let strategy = strategy(client);
        let config = NodeConfig::from_value(&json!({
            "url": "/x",
            "authentication": { "clientName": "ghost" }
        }))
        .unwrap();

        let result = strategy.execute(&context(), &config).await;
        let error = result["error"].as_str().unwrap();
        assert!(error.starts_with("INTERNAL request failed:"));
        assert!(error.contains("ghost"));
    }

    #[tokio::test]
    async fn test_client_error_response_normalized() {
        let client = FakeSigningClient::responding(403, r#"{"reason":"scope"}"#);
        let strategy = strategy(client);
        let config = NodeConfig::from_value(&json!({
            "url": "/x",
            "authentication": { "clientName": "payments" }
        }))
        .unwrap();

        let result = strategy.execute(&context(), &config).await;
        assert_eq!(result["statusCode"], 403);
        assert_eq!(result["error"], "HTTP 403");
        assert_eq!(result["responseBody"]["reason"], "scope");
    }
}
