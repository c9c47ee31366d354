//! service-core: Shared infrastructure for the finance gateway services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod utils;
