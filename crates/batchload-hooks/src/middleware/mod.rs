//! Tower middleware.
//!
//! Includes:
//! - Scope per service call (`ScopeLayer`)

mod scope_layer;

pub use crate::config::ScopeStrategy;
pub use scope_layer::{ScopeLayer, ScopeService};
