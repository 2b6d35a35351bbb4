//! Coalesce Core Library
//!
//! Coalesces many concurrent "fetch by query" calls into a few batched calls
//! against a data source (the dataloader pattern).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          Callers: loader.fetch(q1), fetch(q2) ...        │
//! └───────────────────────────┬─────────────────────────────┘
//!                             │
//!                    ┌────────▼────────┐
//!                    │     Loader      │ ← pending set + single timer
//!                    └────────┬────────┘
//!                             │ TimingPolicy decides when
//!                    ┌────────▼────────┐
//!                    │    BatchFn      │ ← one call per batch
//!                    └────────┬────────┘
//!                             │ shared Outcome
//!                    ┌────────▼────────┐
//!                    │   Correlate     │ ← each caller's own value
//!                    └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`loader`]: the batch orchestrator and its builder
//! - [`timing`]: `Window`, `Buffer` and `Capped` policies
//! - [`correlate`]: `ByField`, `ByKey` and `ByPredicate` strategies
//! - [`deferred`]: externally settled shared outcomes
//! - [`observer`] / [`metrics`]: passive lifecycle hooks
//! - [`config`]: presets and environment configuration

pub mod config;
pub mod correlate;
pub mod deferred;
pub mod error;
pub mod loader;
pub mod metrics;
pub mod observer;
pub mod timing;


pub use config::{LoaderConfig, PolicyKind};
pub use correlate::{ByField, ByKey, ByPredicate, Correlate};
pub use error::{ConfigError, LoadError};
pub use loader::{BatchFn, Loader, LoaderBuilder};
pub use metrics::{LoaderMetrics, MetricsSnapshot};
pub use observer::{BatchEvent, BatchObserver, FanOut, TracingObserver};
pub use timing::{Buffer, Capped, TimingPolicy, Window};
