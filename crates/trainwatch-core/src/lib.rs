//! Trainwatch Core - samples, history and chart series
//!
//! The synchronous half of the live training monitor:
//! - Decodes inbound text frames into typed metric samples
//! - Keeps an ordered, optionally bounded history per subscription
//! - Projects that history into labelled chart series, incrementally
//!
//! Nothing here performs I/O; the reconnecting transport lives in
//! `trainwatch-stream`.
//!
//! # Example
//!
//! ```rust
//! use trainwatch_core::{AxisConfig, Decoded, HistoryStore, RetentionPolicy, SampleCodec, project};
//!
//! let codec = SampleCodec::new();
//! let mut history = HistoryStore::new(RetentionPolicy::Unbounded);
//!
//! for frame in ["ping", r#"{"epoch":1,"loss":0.9}"#, r#"{"epoch":2,"loss":0.7}"#] {
//!     if let Ok(Decoded::Sample(sample)) = codec.decode(frame) {
//!         history.append(sample);
//!     }
//! }
//!
//! let projection = project(&history.snapshot(), &AxisConfig::default());
//! assert_eq!(projection.labels, vec!["epoch 1", "epoch 2"]);
//! ```

#![warn(unreachable_pub)]

pub mod codec;
pub mod error;
pub mod history;
pub mod projector;
pub mod sample;

// Re-exports for convenience
pub use codec::{Decoded, SampleCodec, KEEP_ALIVE};
pub use error::{AxisError, DecodeError};
pub use history::{HistorySnapshot, HistoryStore, RetentionPolicy};
pub use projector::{project, AxisConfig, AxisRange, Projection, SeriesProjector};
pub use sample::{MetricKey, MetricSample, SampleBuilder};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with trainwatch samples
    pub use crate::{
        project, AxisConfig, Decoded, HistoryStore, MetricKey, MetricSample, Projection,
        RetentionPolicy, SampleCodec, SeriesProjector,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
