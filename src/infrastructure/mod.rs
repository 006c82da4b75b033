//! Infrastructure Layer
//!
//! Implementations of the store and collaborator traits:
//! - In-memory backend (`memory`)
//! - PostgreSQL backend (`database`, `repositories`)
//! - JWT identity verification
//! - Prometheus metrics

pub mod database;
pub mod identity;
pub mod memory;
pub mod metrics;
pub mod repositories;
