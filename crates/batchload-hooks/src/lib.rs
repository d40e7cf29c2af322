//! batchload-hooks: unit-of-work boundaries for batchload
//!
//! Deferred values share state through a [`batchload_core::Scope`], and that
//! state must be discarded when the unit of work ends. This crate wires that
//! lifecycle into the places units of work begin and end:
//!
//! - `middleware` - tower layer opening a scope per service call
//! - `jobs` - runner opening a scope per background job
//! - `guard` - RAII guard and the shared scope-entry routine
//! - `config` - layered YAML/environment configuration
//! - `observability` - `tracing-subscriber` initialization
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{routing::get, Router};
//! use batchload_hooks::config::BatchLoadConfig;
//! use batchload_hooks::middleware::ScopeLayer;
//! use batchload_hooks::observability::init_logging;
//!
//! let config = BatchLoadConfig::load("batchload.yaml")?;
//! init_logging(&config.logging);
//!
//! let app = Router::new()
//!     .route("/posts", get(list_posts))
//!     .layer(ScopeLayer::from_settings(&config.scope));
//! ```

pub mod config;
pub mod guard;
pub mod jobs;
pub mod middleware;
pub mod observability;

pub use config::{BatchLoadConfig, ConfigLoadError, ScopeStrategy};
pub use guard::{run_in_scope, ScopeGuard};
pub use jobs::JobRunner;
pub use middleware::{ScopeLayer, ScopeService};
