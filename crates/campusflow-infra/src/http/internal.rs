//! Credential-signing client for internal service calls.
//!
//! Each internal service ("student-service", "payment-service", ...) has a
//! configured base URL and a shared signing secret. Requests carry an
//! HMAC-SHA256 signature over method, URL, timestamp, and body so the
//! receiving service can verify both origin and integrity.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use campusflow_core::strategy::transport::{
    HttpResponseParts, InternalServiceClient, RequestSpec, TransportError,
};
use campusflow_types::config::InternalClientConfig;
use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use super::transport::send_spec;

type HmacSha256 = Hmac<Sha256>;

/// One resolved internal service credential.
struct ClientCredential {
    base_url: String,
    key_id: String,
    secret: SecretString,
}

/// `InternalServiceClient` implementation over configured credentials.
pub struct SignedServiceClient {
    clients: DashMap<String, ClientCredential>,
    http: reqwest::Client,
}

impl SignedServiceClient {
    /// Build the client registry from configuration.
    pub fn from_config(clients: &HashMap<String, InternalClientConfig>, timeout: Duration) -> Self {
        let registry = DashMap::new();
        for (name, config) in clients {
            registry.insert(
                name.clone(),
                ClientCredential {
                    base_url: config.base_url.trim_end_matches('/').to_string(),
                    key_id: config.key_id.clone(),
                    secret: SecretString::from(config.secret.clone()),
                },
            );
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("campusflow-engine/0.1")
            .build()
            .expect("failed to build HTTP client");

        Self {
            clients: registry,
            http,
        }
    }

    /// Resolve a node's URL against the client's base. Absolute URLs pass
    /// through; relative paths are joined.
    fn resolve_url(base_url: &str, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", base_url, url.trim_start_matches('/'))
        }
    }

    /// HMAC-SHA256 over `method \n url \n timestamp \n body`, base64-encoded.
    fn sign(
        secret: &SecretString,
        method: &str,
        url: &str,
        timestamp: &str,
        body: &str,
    ) -> Result<String, TransportError> {
        let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("signing key: {e}")))?;
        mac.update(format!("{method}\n{url}\n{timestamp}\n{body}").as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}

impl InternalServiceClient for SignedServiceClient {
    fn make_signed_request(
        &self,
        client_name: &str,
        spec: RequestSpec,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponseParts, TransportError>> + Send + '_>> {
        let client_name = client_name.to_string();
        Box::pin(async move {
            let (url, key_id, signature, timestamp) = {
                let credential = self
                    .clients
                    .get(&client_name)
                    .ok_or_else(|| TransportError::UnknownClient(client_name.clone()))?;

                let url = Self::resolve_url(&credential.base_url, &spec.url);
                let timestamp = Utc::now().timestamp().to_string();
                let body = spec
                    .body
                    .as_ref()
                    .map(|b| serde_json::to_string(b))
                    .transpose()
                    .map_err(|e| TransportError::InvalidRequest(format!("body: {e}")))?
                    .unwrap_or_default();

                let signature = Self::sign(
                    &credential.secret,
                    spec.method.as_str(),
                    &url,
                    &timestamp,
                    &body,
                )?;
                (url, credential.key_id.clone(), signature, timestamp)
            };

            let mut signed = spec;
            signed.url = url;
            signed.headers.push(("X-Client-Id".to_string(), key_id));
            signed
                .headers
                .push(("X-Request-Timestamp".to_string(), timestamp));
            signed.headers.push(("X-Signature".to_string(), signature));

            tracing::debug!(
                client = client_name.as_str(),
                url = signed.url.as_str(),
                "sending signed internal request"
            );

            send_spec(&self.http, signed).await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
