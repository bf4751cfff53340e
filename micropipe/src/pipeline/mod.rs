//! Staged, channel-connected pipeline execution.
//!
//! This module provides the engine that every stage kind plugs into:
//! - A single `Stage` contract (run loop over an input and an output channel)
//! - Per-item handlers dispatched concurrently by the fan-out worker
//! - Typed chaining, execution, and run metrics
//!
//! ## Architecture
//!
//! ```text
//! seeder ──▶ Stage 0 ──▶ Stage 1 ──▶ ... ──▶ Stage N ──▶ tail collector
//!        ch0         ch1         ch2                chN+1
//!
//! - Seeder: pushes pumped values, then the end-of-flow sentinel
//! - Stage: reads until the sentinel, finishes its work, forwards one sentinel
//! - Tail collector: gathers everything the last stage emits
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use micropipe::pipeline::Pipeline;
//! use micropipe::stages::{CollectList, Filter, Transform};
//!
//! let pipeline = Pipeline::builder()
//!     .pipe(Transform::new(|v: &FlowValue<u32>| v.value * 2))
//!     .pipe(Filter::new(|v: &FlowValue<u32>| v.value % 4 == 0))
//!     .pipe(CollectList::new(2)?)
//!     .build()?;
//!
//! let run = pipeline.pump(0..10).await;
//! println!("{}", run.metrics);
//! ```

mod handler;
mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
pub(crate) mod worker;

pub use handler::{Emitter, ItemHandler, MetaFunc, StageExt, StageOptions};
pub use metrics::{PipelineMetrics, StageMetrics, StageReport};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineRun};
pub use stage::{BoxedStage, ExecutionMode, Stage};
