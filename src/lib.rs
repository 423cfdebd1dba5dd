//! Typed, in-process streaming pipelines with one worker thread per stage.
//!
//! A pipeline is an ordered chain of stages — one generator, any number of
//! transforms, one sink — connected by FIFO buffers. Adjacent stages share a
//! buffer; every message is an [`Envelope`] so the end-of-stream signal
//! travels in-band behind the items queued ahead of it.
//!
//! # Features
//!
//! - Strict FIFO ordering end to end, one worker thread per stage
//! - Filter stages (drop items) and hatch stages (emit several outputs per
//!   input) alongside plain 1→1 transforms
//! - `run` / `pause` / `stop` / `consume` lifecycle with clean cooperative
//!   shutdown: pausing freezes the buffers without losing data, stopping
//!   unblocks every worker by closing them
//! - Optional buffer capacity bound for natural backpressure
//! - Per-stage counters for processed, filtered and faulted items
//!
//! # Example
//!
//! ```
//! use conveyor::{from_iter, PipelineBuilder};
//! use std::sync::{Arc, Mutex};
//!
//! let collected = Arc::new(Mutex::new(Vec::new()));
//! let out = Arc::clone(&collected);
//!
//! let pipeline = PipelineBuilder::new()
//!     .generator(from_iter(1..=5))
//!     .transform(|n: i32| n * 2)
//!     .sink(move |n| out.lock().unwrap().push(n));
//!
//! pipeline.consume();
//! assert_eq!(*collected.lock().unwrap(), vec![2, 4, 6, 8, 10]);
//! ```

pub mod buffer;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod source;
pub mod stage;
pub mod topology;

// Re-exports for convenience
pub use buffer::{BufferMode, BufferQueue};
pub use envelope::Envelope;
pub use error::{PipelineError, Result, StageError};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{Outcome, Pipeline, PipelineBuilder, PipelineState, StageChain};
pub use source::from_iter;
pub use stage::Stage;
pub use topology::{Filtered, Hatchable};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
