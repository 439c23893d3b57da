//! The Unseal Strategy: ordered single-share submission with quorum logic,
//! plus the composable retry and parallel-fanout decorators.

pub mod parallel;
pub mod retry;
pub mod strategy;

pub use parallel::{ParallelStrategy, ParallelTarget};
pub use retry::{DefaultRetryPolicy, RetryPolicy, RetryStrategy};
pub use strategy::{DefaultUnsealStrategy, MetricsSink, UnsealStrategy};
