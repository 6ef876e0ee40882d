//! Infrastructure layer for CampusFlow.
//!
//! Contains implementations of the ports defined in `campusflow-core`:
//! SQLite repositories (WAL mode, split read/write pools), the reqwest HTTP
//! transport and credential-signing internal client, and the engine
//! configuration loader.

pub mod config;
pub mod http;
pub mod sqlite;
