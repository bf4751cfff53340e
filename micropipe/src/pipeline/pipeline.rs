//! Pipeline wiring and execution.
//!
//! A pipeline is a chain of stages joined by flow channels. Building one
//! pre-creates every channel and turns each stage into a launcher; running it
//! drives the seeder, every stage and the tail collector concurrently until
//! the end-of-flow sentinel has passed through the whole chain.

use super::metrics::{PipelineMetrics, StageMetrics};
use super::stage::{BoxedStage, ExecutionMode, Stage};
use crate::channel::{FlowReceiver, FlowSender, flow_channel};
use crate::context::{LostValue, RunContext};
use crate::options::PipelineOptions;
use futures::future::{BoxFuture, join_all};
use futures::{FutureExt, Stream, StreamExt};
use micropipe_shared::{FlowValue, PipelineError, PipelineResult};
use std::time::Instant;
use tracing::Instrument;

type StageLauncher = Box<dyn FnOnce(RunContext) -> BoxFuture<'static, StageMetrics> + Send>;

/// Typed chain under construction: accepts `I` at the head, yields `O` at the tail.
pub struct PipelineBuilder<I, O> {
    options: PipelineOptions,
    seed: FlowSender<I>,
    launchers: Vec<StageLauncher>,
    tail: FlowReceiver<O>,
    source_led: bool,
    invalid: Option<PipelineError>,
}

impl<I: Send + 'static> PipelineBuilder<I, I> {
    pub fn new() -> Self {
        Self::with_options(PipelineOptions::default())
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        let (seed, tail) = flow_channel(options.input_capacity);
        Self {
            options,
            seed,
            launchers: Vec::new(),
            tail,
            source_led: false,
            invalid: None,
        }
    }
}

impl<I: Send + 'static> Default for PipelineBuilder<I, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> PipelineBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Append a stage reading this chain's current output.
    pub fn pipe<S>(self, stage: S) -> PipelineBuilder<I, S::Output>
    where
        S: Stage<Input = O>,
    {
        let PipelineBuilder {
            options,
            seed,
            mut launchers,
            tail,
            mut source_led,
            mut invalid,
        } = self;

        let index = launchers.len();
        let name = stage.name().to_string();
        let execution = stage.execution();
        let capacity = stage.output_capacity();

        if execution == ExecutionMode::Source {
            if index == 0 {
                source_led = true;
            } else if invalid.is_none() {
                invalid = Some(PipelineError::Config(format!(
                    "stage {} ({}): a source stage can only be the first stage",
                    index, name
                )));
            }
        }
        if invalid.is_none() {
            if let Err(e) = capacity.validate() {
                invalid = Some(PipelineError::Config(format!(
                    "stage {} ({}): {}",
                    index, name, e
                )));
            }
        }

        let (output, next_tail) = flow_channel(capacity);
        let input = tail;

        launchers.push(Box::new(move |ctx: RunContext| {
            let span = tracing::info_span!("stage", index, name = %name);
            async move {
                tracing::debug!(execution = ?execution, "Stage started");
                let start = Instant::now();
                let report = S::run(Box::new(stage), input, output, ctx).await;
                StageMetrics {
                    index,
                    name,
                    execution,
                    scheduled: report.scheduled,
                    succeeded: report.succeeded,
                    duration_ms: start.elapsed().as_millis(),
                }
            }
            .instrument(span)
            .boxed()
        }));

        PipelineBuilder {
            options,
            seed,
            launchers,
            tail: next_tail,
            source_led,
            invalid,
        }
    }

    /// Finish the chain.
    ///
    /// Fails when no stage was added, when a source stage is not first, or
    /// when the options or a stage's channel capacity are invalid.
    pub fn build(self) -> PipelineResult<Pipeline<I, O>> {
        if let Some(e) = self.invalid {
            return Err(e);
        }
        if self.launchers.is_empty() {
            return Err(PipelineError::Config(
                "a pipeline needs at least one stage".into(),
            ));
        }
        self.options.validate()?;

        Ok(Pipeline {
            options: self.options,
            seed: self.seed,
            launchers: self.launchers,
            tail: self.tail,
            source_led: self.source_led,
        })
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct PipelineRun<O> {
    /// Every value the last stage emitted, in arrival order.
    pub values: Vec<FlowValue<O>>,
    /// The lost-value ledger.
    pub lost: Vec<LostValue>,
    pub metrics: PipelineMetrics,
}

impl<O> PipelineRun<O> {
    /// Payloads of the emitted values, metadata discarded.
    pub fn into_values(self) -> Vec<O> {
        self.values.into_iter().map(|v| v.value).collect()
    }
}

/// A wired, single-use pipeline.
pub struct Pipeline<I, O> {
    options: PipelineOptions,
    seed: FlowSender<I>,
    launchers: Vec<StageLauncher>,
    tail: FlowReceiver<O>,
    /// The first stage produces its own values and ignores seeds.
    source_led: bool,
}

impl<I: Send + 'static> Pipeline<I, I> {
    pub fn builder() -> PipelineBuilder<I, I> {
        PipelineBuilder::new()
    }

    /// Wire homogeneous, type-erased stages in order.
    pub fn from_stages(stages: Vec<BoxedStage<I, I>>) -> PipelineResult<Self> {
        Self::from_stages_with_options(stages, PipelineOptions::default())
    }

    pub fn from_stages_with_options(
        stages: Vec<BoxedStage<I, I>>,
        options: PipelineOptions,
    ) -> PipelineResult<Self> {
        stages
            .into_iter()
            .fold(PipelineBuilder::with_options(options), |builder, stage| {
                builder.pipe(stage)
            })
            .build()
    }
}

impl<I, O> Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn stage_count(&self) -> usize {
        self.launchers.len()
    }

    /// Run the pipeline over `values`, each entering the first stage.
    pub async fn pump<It, V>(self, values: It) -> PipelineRun<O>
    where
        It: IntoIterator<Item = V>,
        V: Into<FlowValue<I>>,
    {
        self.execute(futures::stream::iter(values)).await
    }

    /// Run the pipeline over an asynchronous sequence of values.
    pub async fn pump_stream<St, V>(self, values: St) -> PipelineRun<O>
    where
        St: Stream<Item = V>,
        V: Into<FlowValue<I>>,
    {
        self.execute(values).await
    }

    async fn execute<St, V>(self, values: St) -> PipelineRun<O>
    where
        St: Stream<Item = V>,
        V: Into<FlowValue<I>>,
    {
        let ctx = RunContext::new();
        let span = tracing::info_span!(
            "pipeline",
            run_id = %ctx.run_id(),
            stages = self.launchers.len()
        );

        let Pipeline {
            options,
            seed,
            launchers,
            mut tail,
            source_led,
        } = self;

        async move {
            tracing::info!("Pipeline started");
            let total_start = Instant::now();

            let stage_runs = launchers
                .into_iter()
                .map(|launch| launch(ctx.clone()))
                .collect::<Vec<_>>();

            let ((), stages, values) = futures::join!(
                seed_flow(values, seed, source_led, ctx.clone()),
                join_all(stage_runs),
                tail.collect_until_end(),
            );

            let lost = ctx.take_lost();
            let metrics = PipelineMetrics {
                total_duration_ms: total_start.elapsed().as_millis(),
                values_entered: ctx.values_entered(),
                values_flowed: ctx.values_flowed(),
                values_lost: lost.len() as u64,
                stages,
            };

            tracing::info!(
                values_out = values.len(),
                values_lost = metrics.values_lost,
                "Pipeline finished: {}",
                metrics
            );
            if options.log_lost_values {
                for entry in &lost {
                    tracing::debug!(
                        stage = %entry.stage,
                        reason = %entry.reason,
                        value = %entry.repr(),
                        "Lost value"
                    );
                }
            }

            PipelineRun {
                values,
                lost,
                metrics,
            }
        }
        .instrument(span)
        .await
    }
}

/// Feed seed values into the first stage, then the sentinel.
///
/// Only values the first stage accepted count as entered. A source-led
/// pipeline gets no seeds at all.
async fn seed_flow<I, St, V>(values: St, seed: FlowSender<I>, source_led: bool, ctx: RunContext)
where
    St: Stream<Item = V>,
    V: Into<FlowValue<I>>,
{
    futures::pin_mut!(values);
    if source_led {
        let ignored = values.count().await;
        if ignored > 0 {
            tracing::warn!(ignored, "First stage is a source, seed values ignored");
        }
        return;
    }
    while let Some(value) = values.next().await {
        if seed.send_value(value.into()).await.is_err() {
            tracing::debug!("First stage stopped reading seed values");
            return;
        }
        ctx.record_entered();
    }
    if seed.send_end().await.is_err() {
        tracing::debug!("First stage stopped reading before end of flow");
    }
}

impl<O: Send + 'static> Pipeline<(), O> {
    /// Run a pipeline whose first stage produces its own values.
    pub async fn run(self) -> PipelineRun<O> {
        self.pump_stream(futures::stream::empty::<FlowValue<()>>())
            .await
    }
}
