//! # Chat Engine Library
//!
//! Presence tracking and delivery/read reconciliation for a real-time chat
//! backend:
//! - WebSocket gateway for realtime events
//! - Read-only RESTful HTTP API for history, sync and receipts
//! - In-memory or PostgreSQL storage
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Messages, delivery state, store and collaborator traits
//! - **Application Layer**: Event routing, presence, catch-up and queries
//! - **Infrastructure Layer**: Storage backends, identity verification, metrics
//! - **Presentation Layer**: HTTP handlers and WebSocket gateway
//!
//! ## Module Structure
//!
//! ```text
//! chat_engine/
//! +-- config/         Configuration management
//! +-- domain/         Domain entities, value objects, and traits
//! +-- application/    Engine services, channels and DTOs
//! +-- infrastructure/ Storage backends, identity, metrics
//! +-- presentation/   HTTP routes and WebSocket handlers
//! +-- shared/         Common utilities (errors, validation)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Engine services
pub mod application;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
