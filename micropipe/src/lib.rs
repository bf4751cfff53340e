//! micropipe: an asynchronous staged pipeline engine.
//!
//! Values tagged with metadata flow through a chain of stages connected by
//! channels. Each stage fans items out to concurrent handlers, throttles
//! them, or batches them; an end-of-flow sentinel moves through the chain
//! exactly once so every stage knows when to finish. Items a handler fails
//! on are kept in a lost-value ledger instead of aborting the run.

pub mod channel;
pub mod context;
pub mod logging;
pub mod options;
pub mod pipeline;
pub mod stages;

pub use channel::{Capacity, FlowReceiver, FlowSender, flow_channel};
pub use context::{DROP_STAGE_KEY, LostValue, RunContext};
pub use micropipe_shared::{Flow, FlowValue, MetaData, PipelineError, PipelineResult};
pub use options::PipelineOptions;
pub use pipeline::{
    BoxedStage, Emitter, ExecutionMode, ItemHandler, Pipeline, PipelineBuilder, PipelineMetrics,
    PipelineRun, Stage, StageExt, StageMetrics, StageOptions,
};
