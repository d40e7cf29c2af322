//! batchload-core: deferred batch loading
//!
//! Coalesces many "fetch one item" requests made at unrelated points of a
//! unit of work into a single batched fetch, then hands each caller its own
//! result. This is the N+1 cure that does not require restructuring callers
//! around explicit batching.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               batchload-core                 │
//! ├─────────────────────────────────────────────┤
//! │  scope.rs    - Unit-of-work scope & store   │
//! │  group.rs    - Batch groups and keys        │
//! │  loader.rs   - Loader callback              │
//! │  wave.rs     - Wave execution               │
//! │  deferred/   - Deferred value state machine │
//! │  resolve.rs  - Nested resolution            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use batchload_core::{BindOptions, BoxError, Scope};
//!
//! let scope = Scope::new();
//! let mut lazy = scope.defer(1u64).batch(
//!     |ids, loader, _context| async move {
//!         for id in ids.iter() {
//!             loader.load(*id, *id * 10)?;
//!         }
//!         Ok::<_, BoxError>(())
//!     },
//!     BindOptions::default(),
//! )?;
//! assert_eq!(lazy.resolve().await?, 10);
//! ```

pub mod deferred;
pub mod error;
pub mod group;
pub mod loader;
pub mod resolve;
pub mod scope;
pub mod wave;

// Re-export commonly used types at the crate root
pub use deferred::{BindOptions, DeferredValue};
pub use error::{BatchLoadError, BatchLoadResult, BoxError, UsageError};
pub use group::{BatchGroup, BatchKey};
pub use loader::{LoadArgs, LoadMode, Loader};
pub use resolve::{resolve_all, Ready, Resolve};
pub use scope::{clear_scope, current_scope, defer, open_scope, Scope, ScopeStore};
pub use wave::{BatchFn, ContextMap};

#[doc(hidden)]
pub mod __private {
    pub use async_trait::async_trait;
}
