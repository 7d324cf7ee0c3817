//! Read-through, invalidation-aware SQL query cache.

pub mod cache;
pub mod config;
pub mod infra;
