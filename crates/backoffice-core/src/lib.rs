//! Backoffice Core Library
//!
//! Shared domain types, configuration, the shared TTL cache and database
//! access for the backoffice access-control pipeline.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use cache::{Cache, CacheExt, MemoryCache, RedisCache};
pub use error::{Error, Result};
