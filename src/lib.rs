//! Synthetic tick generation and sliding-window aggregation.
//!
//! ```text
//! TickGenerator -> Publisher -> Transport -> AggregationEngine -> Sink
//! ```

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod model;
pub mod publisher;
pub mod sink;
pub mod transport;
pub mod watermark;
pub mod window;
