//! HTTP adapters for the action strategy seams.
//!
//! Implements `campusflow-core`'s `HttpTransport` (plain calls for EXTERNAL
//! nodes) and `InternalServiceClient` (credential-signed calls for INTERNAL
//! nodes) over reqwest.

pub mod internal;
pub mod transport;
