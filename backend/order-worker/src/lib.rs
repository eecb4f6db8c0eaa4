//! Pipeline worker for the order middleware.
//!
//! Consumes `order.created`, drives each order through the CMS, ROS, and
//! WMS backends with at-least-once semantics, and hands completed orders
//! to a driver. Failures are classified, retried with per-attempt backoff
//! through the retry queue, and parked on the DLQ once the budget runs
//! out.

pub mod adapters;
pub mod classify;
pub mod config;
pub mod consumer;
pub mod pipeline;
pub mod retry;
pub mod terminator;

pub use config::WorkerConfig;
pub use consumer::{run_consumer, AmqpDeliveryAcker, AmqpRetryRouter, ConsumerDeps};
pub use pipeline::{DeliveryAcker, MessageOutcome, PipelineWorker, RetryRouter};
pub use retry::RetryPolicy;
pub use terminator::Terminator;
