//! The stage contract every pipeline step satisfies.

use super::metrics::StageReport;
use crate::channel::{Capacity, FlowReceiver, FlowSender};
use crate::context::RunContext;
use async_trait::async_trait;

/// How a stage consumes its input channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Produces values from its own sequence; ignores its input.
    Source,
    /// Dispatches one concurrent handler per item (unordered).
    Parallel,
    /// Processes one item at a time, in arrival order.
    Sequential,
    /// Accumulates items into batches, in arrival order.
    Collect,
}

/// A unit of the pipeline: reads an input channel, writes an output channel.
///
/// Every stage kind (source, fan-out worker, rate limiter, collector) owns
/// its run loop but honours the same end-of-flow contract: after reading the
/// sentinel from `input` and finishing its own work, it writes exactly one
/// sentinel to `output`. The run loop never fails; item-level failures go
/// into the run context's ledger.
///
/// Handler-based stages get this trait through their [`ItemHandler`]
/// implementation.
///
/// [`ItemHandler`]: super::ItemHandler
#[async_trait]
pub trait Stage: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Human-readable stage name for logging and metrics.
    fn name(&self) -> &str;

    fn execution(&self) -> ExecutionMode;

    /// Capacity of the channel this stage writes to.
    fn output_capacity(&self) -> Capacity {
        Capacity::Unbounded
    }

    /// Run the stage to completion.
    async fn run(
        self: Box<Self>,
        input: FlowReceiver<Self::Input>,
        output: FlowSender<Self::Output>,
        ctx: RunContext,
    ) -> StageReport;
}

pub type BoxedStage<I, O> = Box<dyn Stage<Input = I, Output = O>>;

#[async_trait]
impl<I, O> Stage for BoxedStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        (**self).name()
    }

    fn execution(&self) -> ExecutionMode {
        (**self).execution()
    }

    fn output_capacity(&self) -> Capacity {
        (**self).output_capacity()
    }

    async fn run(
        self: Box<Self>,
        input: FlowReceiver<I>,
        output: FlowSender<O>,
        ctx: RunContext,
    ) -> StageReport {
        let inner: BoxedStage<I, O> = *self;
        <dyn Stage<Input = I, Output = O> as Stage>::run(inner, input, output, ctx).await
    }
}
