//! API request handlers.

pub mod access;
pub mod audit_logs;
pub mod health;
pub mod roles;
