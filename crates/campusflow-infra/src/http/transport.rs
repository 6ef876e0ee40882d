//! Reqwest-backed `HttpTransport` implementation.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use campusflow_core::strategy::transport::{
    HttpResponseParts, HttpTransport, RequestSpec, TransportError,
};

/// Plain HTTP transport with a bounded timeout.
///
/// The engine enforces no timeout of its own; this client's is the only
/// bound on a node action's duration.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("campusflow-engine/0.1")
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }
}

/// Execute a request spec on a reqwest client and capture the response.
///
/// Shared by the plain transport and the signing client.
pub(crate) async fn send_spec(
    client: &reqwest::Client,
    spec: RequestSpec,
) -> Result<HttpResponseParts, TransportError> {
    let method: reqwest::Method = spec
        .method
        .as_str()
        .parse()
        .map_err(|_| TransportError::InvalidRequest(format!("method {}", spec.method.as_str())))?;

    let mut request = client.request(method, &spec.url);

    if !spec.query.is_empty() {
        request = request.query(&spec.query);
    }
    for (key, value) in &spec.headers {
        request = request.header(key.as_str(), value.as_str());
    }
    if let Some(body) = &spec.body {
        request = request.json(body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| TransportError::Network(format!("{}: {e}", spec.url)))?;

    let status = response.status().as_u16();
    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                v.to_str().unwrap_or("<binary>").to_string(),
            )
        })
        .collect();
    let body = response
        .text()
        .await
        .map_err(|e| TransportError::Network(format!("reading response body: {e}")))?;

    tracing::debug!(url = spec.url.as_str(), status, body_len = body.len(), "node HTTP call");

    Ok(HttpResponseParts {
        status,
        headers,
        body,
    })
}

impl HttpTransport for ReqwestTransport {
    fn send(
        &self,
        spec: RequestSpec,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponseParts, TransportError>> + Send + '_>> {
        Box::pin(send_spec(&self.client, spec))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use campusflow_core::strategy::transport::HttpMethod;

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = ReqwestTransport::new(Duration::from_millis(200));
        let spec = RequestSpec {
            method: HttpMethod::Get,
            // Reserved TEST-NET-1 address: never routable.
            url: "http://192.0.2.1:9/ping".to_string(),
            headers: vec![],
            query: vec![],
            body: None,
        };

        let err = transport.send(spec).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_error_not_panic() {
        let transport = ReqwestTransport::new(Duration::from_millis(200));
        let spec = RequestSpec {
            method: HttpMethod::Get,
            url: "not a url".to_string(),
            headers: vec![],
            query: vec![],
            body: None,
        };

        assert!(transport.send(spec).await.is_err());
    }
}
