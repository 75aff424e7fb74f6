//! Core domain types for the backoffice access-control pipeline.

pub mod audit;
pub mod permission;
pub mod principal;
pub mod role;

pub use audit::*;
pub use permission::*;
pub use principal::*;
pub use role::*;
