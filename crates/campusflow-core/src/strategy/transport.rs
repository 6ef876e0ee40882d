//! HTTP seams for node actions.
//!
//! The strategies in this module's siblings build fully evaluated request
//! descriptors; the actual network I/O happens behind these traits, whose
//! implementations live in `campusflow-infra` (dependency inversion, same
//! pattern as the repository ports).

use std::collections::HashMap;
use std::pin::Pin;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

/// HTTP methods a node config may specify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Parse a config value, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Whether a request body is sent for this method. Bodies configured on
    /// GET/DELETE nodes are skipped.
    pub fn allows_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

/// A fully evaluated, ready-to-send request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// JSON body; `None` for body-less methods.
    pub body: Option<Value>,
}

/// The transport-level view of a response, before normalization.
#[derive(Debug, Clone)]
pub struct HttpResponseParts {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Transport failures: anything that prevented obtaining a response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Network(String),

    #[error("unknown internal client '{0}'")]
    UnknownClient(String),
}

// ---------------------------------------------------------------------------
// Seam traits
// ---------------------------------------------------------------------------

type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponseParts, TransportError>> + Send + 'a>>;

/// Plain HTTP client seam used by the EXTERNAL strategy.
///
/// Implementations should impose a bounded timeout; the engine itself does
/// not enforce one.
pub trait HttpTransport: Send + Sync {
    fn send(&self, spec: RequestSpec) -> TransportFuture<'_>;
}

/// Credential-signing client seam used by the INTERNAL strategy.
///
/// `client_name` selects which internal service credential signs the
/// request. Owned outside this crate.
pub trait InternalServiceClient: Send + Sync {
    fn make_signed_request(&self, client_name: &str, spec: RequestSpec) -> TransportFuture<'_>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
