//! Batch collectors.

mod spill;

pub use spill::SpillDeque;

use crate::channel::{Capacity, FlowReceiver, FlowSender};
use crate::context::RunContext;
use crate::pipeline::worker::log_completion;
use crate::pipeline::{Emitter, ExecutionMode, Stage, StageExt, StageOptions, StageReport};
use async_trait::async_trait;
use micropipe_shared::{Flow, FlowValue, MetaData, PipelineError, PipelineResult};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

/// An ordered container a collector appends items to.
pub trait BatchContainer<T>: Send + 'static {
    /// Append `item`, handing it back with the cause on failure.
    fn push(&mut self, item: T) -> Result<(), (T, PipelineError)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> BatchContainer<T> for Vec<T> {
    fn push(&mut self, item: T) -> Result<(), (T, PipelineError)> {
        Vec::push(self, item);
        Ok(())
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

/// Accumulates values into batches, in arrival order.
///
/// A batch size of 0 collects everything into a single batch emitted at the
/// end of the flow. A positive size emits each batch as soon as it is full;
/// the remainder, if any, is emitted at the end. Batches carry fresh (empty)
/// metadata.
pub struct Collect<T, C> {
    batch_size: usize,
    new_batch: Arc<dyn Fn() -> C + Send + Sync>,
    options: StageOptions<C>,
    _items: std::marker::PhantomData<fn(T)>,
}

/// Collects into an in-memory `Vec`.
pub type CollectList<T> = Collect<T, Vec<T>>;

/// Collects into a deque that spills items to a temporary file.
pub type CollectDeque<T> = Collect<T, SpillDeque<T>>;

impl<T, C> Collect<T, C>
where
    T: Debug + Send + 'static,
    C: BatchContainer<T>,
{
    pub fn with_container<F>(batch_size: usize, new_batch: F) -> PipelineResult<Self>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        if batch_size == 1 {
            return Err(PipelineError::Config(
                "a batch size of 1 is pointless".into(),
            ));
        }

        Ok(Self {
            batch_size,
            new_batch: Arc::new(new_batch),
            options: StageOptions::default(),
            _items: std::marker::PhantomData,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<T: Debug + Send + 'static> Collect<T, Vec<T>> {
    pub fn new(batch_size: usize) -> PipelineResult<Self> {
        Self::with_container(batch_size, Vec::new)
    }
}

impl<T> Collect<T, SpillDeque<T>>
where
    T: Debug + Send + serde::Serialize + 'static,
{
    /// Spill batches into temporary files under the system temp directory.
    pub fn new(batch_size: usize) -> PipelineResult<Self> {
        Self::with_container(batch_size, SpillDeque::new)
    }

    /// Spill batches into temporary files under `dir`.
    pub fn in_dir(batch_size: usize, dir: impl Into<PathBuf>) -> PipelineResult<Self> {
        let dir = dir.into();
        Self::with_container(batch_size, move || SpillDeque::in_dir(dir.clone()))
    }
}

impl<T, C> StageExt for Collect<T, C> {
    type Emits = C;

    fn stage_options_mut(&mut self) -> &mut StageOptions<C> {
        &mut self.options
    }
}

#[async_trait]
impl<T, C> Stage for Collect<T, C>
where
    T: Debug + Send + 'static,
    C: BatchContainer<T>,
{
    type Input = T;
    type Output = C;

    fn name(&self) -> &str {
        self.options.name.as_deref().unwrap_or("Collect")
    }

    fn execution(&self) -> ExecutionMode {
        ExecutionMode::Collect
    }

    fn output_capacity(&self) -> Capacity {
        self.options.output_capacity
    }

    async fn run(
        self: Box<Self>,
        mut input: FlowReceiver<T>,
        output: FlowSender<C>,
        ctx: RunContext,
    ) -> StageReport {
        let name = self.name().to_string();
        let emitter = Emitter::new(output.clone(), self.options.meta_func.clone());
        let mut batch = (self.new_batch)();
        let mut scheduled: u64 = 0;
        let mut collected: u64 = 0;
        let mut batches: u64 = 0;

        loop {
            let FlowValue { value, meta } = match input.recv().await {
                Some(Flow::Value(item)) => item,
                Some(Flow::End) => break,
                None => {
                    tracing::warn!(stage = %name, "Input closed without end of flow");
                    break;
                }
            };
            scheduled += 1;

            if let Err((value, e)) = batch.push(value) {
                tracing::warn!(stage = %name, error = %e, "Failed to add value to batch");
                ctx.record_lost(&name, e.to_string(), FlowValue::with_meta(value, meta));
                continue;
            }
            collected += 1;

            if self.batch_size > 0 && batch.len() == self.batch_size {
                let full = std::mem::replace(&mut batch, (self.new_batch)());
                if emitter.emit(full, MetaData::new()).await.is_err() {
                    tracing::warn!(stage = %name, "Output closed, dropping batch");
                }
                batches += 1;
            }
        }

        if !batch.is_empty() {
            if emitter.emit(batch, MetaData::new()).await.is_err() {
                tracing::warn!(stage = %name, "Output closed, dropping final batch");
            }
            batches += 1;
        }

        tracing::info!(stage = %name, batches, values = collected, "Collect complete");
        let report = StageReport::new(scheduled, collected);
        log_completion(&name, &report);
        if output.send_end().await.is_err() {
            tracing::warn!(stage = %name, "Output closed before end of flow could be sent");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::flow_channel;

    async fn collect_batches<C>(stage: Collect<u32, C>, n: u32) -> (Vec<FlowValue<C>>, RunContext)
    where
        C: BatchContainer<u32>,
    {
        let (in_tx, in_rx) = flow_channel(Capacity::Unbounded);
        let (out_tx, mut out_rx) = flow_channel(Capacity::Unbounded);
        for i in 0..n {
            in_tx.send_value(FlowValue::new(i)).await.unwrap();
        }
        in_tx.send_end().await.unwrap();

        let ctx = RunContext::new();
        Box::new(stage).run(in_rx, out_tx, ctx.clone()).await;

        let mut out = Vec::new();
        while let Some(flow) = out_rx.try_recv() {
            out.push(flow);
        }
        assert_eq!(out.iter().filter(|f| f.is_end()).count(), 1);
        assert!(out.last().is_some_and(|f| f.is_end()));
        (out.into_iter().filter_map(|f| f.into_value()).collect(), ctx)
    }

    #[test]
    fn test_batch_size_one_rejected() {
        let err = CollectList::<u32>::new(1).err().unwrap();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn test_unbounded_single_batch() {
        let (batches, _) = collect_batches(CollectList::new(0).unwrap(), 7).await;

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].value, (0..7).collect::<Vec<_>>());
        assert!(batches[0].meta.is_empty());
    }

    #[tokio::test]
    async fn test_bounded_batches_with_remainder() {
        let (batches, _) = collect_batches(CollectList::new(3).unwrap(), 10).await;

        let sizes: Vec<usize> = batches.iter().map(|b| b.value.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        let joined: Vec<u32> = batches.into_iter().flat_map(|b| b.value).collect();
        assert_eq!(joined, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_tail() {
        let (batches, _) = collect_batches(CollectList::new(5).unwrap(), 10).await;
        assert_eq!(batches.len(), 2);
    }

    #[tokio::test]
    async fn test_no_input_no_batch() {
        let (batches, _) = collect_batches(CollectList::new(0).unwrap(), 0).await;
        assert!(batches.is_empty());
    }

    /// Refuses odd items.
    struct EvenOnly(Vec<u32>);

    impl BatchContainer<u32> for EvenOnly {
        fn push(&mut self, item: u32) -> Result<(), (u32, PipelineError)> {
            if item % 2 == 1 {
                return Err((item, PipelineError::Internal("odd".into())));
            }
            self.0.push(item);
            Ok(())
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[tokio::test]
    async fn test_push_failure_is_lost() {
        let stage = Collect::with_container(0, || EvenOnly(Vec::new())).unwrap();
        let (batches, ctx) = collect_batches(stage, 6).await;

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].value.0, vec![0, 2, 4]);
        let lost: Vec<u32> = ctx
            .take_lost()
            .iter()
            .map(|l| *l.downcast_ref::<u32>().unwrap())
            .collect();
        assert_eq!(lost, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_spilling_collector() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CollectDeque::<u32>::in_dir(4, dir.path()).unwrap();
        let (batches, _) = collect_batches(stage, 9).await;

        let mut joined = Vec::new();
        for batch in batches {
            joined.extend(batch.value.into_items().unwrap());
        }
        assert_eq!(joined, (0..9).collect::<Vec<_>>());
    }
}
