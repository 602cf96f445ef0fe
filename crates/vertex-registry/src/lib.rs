//! Algorithm registry and lazy, tiered implementation cache.
//!
//! Algorithms are opaque units of computation implementing [`Executable`].
//! Their immutable metadata lives in an [`AlgorithmCatalog`] built once at
//! startup; implementations are materialized on first use by an
//! [`AlgorithmLoader`] and kept resident in a hot/warm/cold [`TieredCache`].
//!
//! # Main types
//!
//! - [`AlgorithmRegistry`] — `describe`, `acquire` (singleflight), `pin`/`unpin`, `release`.
//! - [`AlgorithmDescriptor`] — Immutable identity and cost profile of an algorithm.
//! - [`TieredCache`] — Capacity-bounded tiers with recency/frequency scoring.
//! - [`ResultMemo`] — Opt-in reuse of outputs for repeated deterministic invocations.
//! - [`Preloader`] — Background task that loads algorithms predicted to be needed soon.

/// Algorithm capability interface and descriptors.
pub mod algorithm;
/// Built-in deterministic algorithms.
pub mod builtins;
/// Tiered cache bookkeeping.
pub mod cache;
/// Static registration table.
pub mod catalog;
/// Memoization of deterministic results.
pub mod memo;
/// Access prediction and background preloading.
pub mod preload;
/// The registry facade.
pub mod registry;

pub use algorithm::{
    AlgorithmCategory, AlgorithmDescriptor, AlgorithmLoader, Executable, ExecutionContext,
    FactoryLoader, ResourceEstimate,
};
pub use cache::{CacheConfig, CacheStats, EntrySnapshot, Tier, TierCounts, TieredCache};
pub use catalog::{AlgorithmCatalog, Registration};
pub use memo::{MemoKey, MemoStats, ResultMemo};
pub use preload::{AccessPredictor, PreloadConfig, Preloader};
pub use registry::{AlgorithmRegistry, PinGuard};
