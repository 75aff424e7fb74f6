//! Backoffice access control
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the internal crates. For actual functionality, use them directly:
//!
//! - `backoffice-core`: Domain types, configuration, shared TTL cache, database pool
//! - `auth`: Permission resolution, rate limiting, audit logging and export
//! - `api-server`: HTTP surface over the above

// Re-export for benchmarks and integration tests
pub use api_server as api;
pub use auth as access;
pub use backoffice_core as core;
