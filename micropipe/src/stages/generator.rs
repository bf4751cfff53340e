//! Source stage producing the pipeline's values from its own sequence.

use crate::channel::{Capacity, FlowReceiver, FlowSender};
use crate::context::RunContext;
use crate::pipeline::{Emitter, ExecutionMode, Stage, StageExt, StageOptions, StageReport};
use crate::pipeline::worker::log_completion;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use micropipe_shared::MetaData;

/// First stage of a self-seeding pipeline.
///
/// Wraps every produced value with empty metadata (or whatever the metadata
/// function derives from it), then writes the sentinel. Its input channel is
/// ignored; run it with [`Pipeline::run`].
///
/// [`Pipeline::run`]: crate::pipeline::Pipeline::run
pub struct FlowGenerator<O> {
    values: BoxStream<'static, O>,
    options: StageOptions<O>,
}

impl<O: Send + 'static> FlowGenerator<O> {
    pub fn new<It>(values: It) -> Self
    where
        It: IntoIterator<Item = O>,
        It::IntoIter: Send + 'static,
    {
        Self::from_stream(futures::stream::iter(values))
    }

    /// Produce values as an asynchronous sequence yields them.
    pub fn from_stream<St>(values: St) -> Self
    where
        St: Stream<Item = O> + Send + 'static,
    {
        Self {
            values: values.boxed(),
            options: StageOptions::default(),
        }
    }
}

impl<O> StageExt for FlowGenerator<O> {
    type Emits = O;

    fn stage_options_mut(&mut self) -> &mut StageOptions<O> {
        &mut self.options
    }
}

#[async_trait]
impl<O: Send + 'static> Stage for FlowGenerator<O> {
    type Input = ();
    type Output = O;

    fn name(&self) -> &str {
        self.options.name.as_deref().unwrap_or("FlowGenerator")
    }

    fn execution(&self) -> ExecutionMode {
        ExecutionMode::Source
    }

    fn output_capacity(&self) -> Capacity {
        self.options.output_capacity
    }

    async fn run(
        self: Box<Self>,
        input: FlowReceiver<()>,
        output: FlowSender<O>,
        ctx: RunContext,
    ) -> StageReport {
        drop(input);
        let name = self.name().to_string();
        let FlowGenerator {
            mut values,
            options,
        } = *self;
        let emitter = Emitter::new(output.clone(), options.meta_func);

        tracing::info!(stage = %name, "Generating flow");
        let mut produced: u64 = 0;
        while let Some(value) = values.next().await {
            ctx.record_entered();
            if emitter.emit(value, MetaData::new()).await.is_err() {
                tracing::warn!(stage = %name, "Output closed, generation stopped");
                break;
            }
            produced += 1;
        }

        let report = StageReport::new(produced, produced);
        log_completion(&name, &report);
        if output.send_end().await.is_err() {
            tracing::warn!(stage = %name, "Output closed before end of flow could be sent");
        }
        report
    }
}
