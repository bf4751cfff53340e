//! Per-item handler contract and the emitter handlers write through.

use super::metrics::StageReport;
use super::stage::{ExecutionMode, Stage};
use super::worker;
use crate::channel::{Capacity, FlowReceiver, FlowSender};
use crate::context::RunContext;
use async_trait::async_trait;
use micropipe_shared::{Flow, FlowValue, MetaData, PipelineResult};
use std::fmt::Debug;
use std::sync::Arc;

/// Derives metadata for an emitted value from the value and the incoming metadata.
pub type MetaFunc<O> = Arc<dyn Fn(&O, MetaData) -> MetaData + Send + Sync>;

/// Stage-level settings shared by every handler-based stage.
pub struct StageOptions<O> {
    /// Overrides the handler's kind as the stage name.
    pub name: Option<String>,
    pub output_capacity: Capacity,
    pub meta_func: Option<MetaFunc<O>>,
}

impl<O> Default for StageOptions<O> {
    fn default() -> Self {
        Self {
            name: None,
            output_capacity: Capacity::Unbounded,
            meta_func: None,
        }
    }
}

impl<O> Clone for StageOptions<O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            output_capacity: self.output_capacity,
            meta_func: self.meta_func.clone(),
        }
    }
}

impl<O> Debug for StageOptions<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageOptions")
            .field("name", &self.name)
            .field("output_capacity", &self.output_capacity)
            .field("meta_func", &self.meta_func.is_some())
            .finish()
    }
}

/// Handle a handler uses to put derived values on the stage's output.
pub struct Emitter<O> {
    sender: FlowSender<O>,
    meta_func: Option<MetaFunc<O>>,
}

impl<O> Clone for Emitter<O> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            meta_func: self.meta_func.clone(),
        }
    }
}

impl<O: Send + 'static> Emitter<O> {
    pub fn new(sender: FlowSender<O>, meta_func: Option<MetaFunc<O>>) -> Self {
        Self { sender, meta_func }
    }

    /// Tag `value` and send it downstream.
    ///
    /// `meta` is normally the incoming value's metadata; when the stage has a
    /// metadata function it replaces `meta` with the function's result.
    pub async fn emit(&self, value: O, meta: MetaData) -> PipelineResult<()> {
        let flow_value = self.wrap(value, meta);
        self.sender.send(Flow::Value(flow_value)).await
    }

    pub fn wrap(&self, value: O, meta: MetaData) -> FlowValue<O> {
        let meta = match &self.meta_func {
            Some(derive) => derive(&value, meta),
            None => meta,
        };
        FlowValue::with_meta(value, meta)
    }
}

/// Per-item processing logic of a fan-out stage.
///
/// The engine dispatches one concurrent call per input item. A handler emits
/// zero or more derived values through `out` and returns:
///
/// - `Ok(true)`: the item was handled,
/// - `Ok(false)`: the item failed and is dropped,
/// - `Err(_)`: the item failed with a reason and is dropped.
///
/// A panic inside `handle` is caught and treated like `Err`. Dropped items
/// land in the run's lost-value ledger and are not forwarded.
#[async_trait]
pub trait ItemHandler: Send + Sync + 'static {
    type Input: Debug + Send + Sync + 'static;
    type Output: Send + 'static;

    /// Default stage name when none was configured.
    fn kind(&self) -> &'static str;

    fn options(&self) -> &StageOptions<Self::Output>;

    fn options_mut(&mut self) -> &mut StageOptions<Self::Output>;

    async fn handle(
        &self,
        item: &FlowValue<Self::Input>,
        out: &Emitter<Self::Output>,
    ) -> PipelineResult<bool>;
}

#[async_trait]
impl<H: ItemHandler> Stage for H {
    type Input = H::Input;
    type Output = H::Output;

    fn name(&self) -> &str {
        self.options().name.as_deref().unwrap_or(self.kind())
    }

    fn execution(&self) -> ExecutionMode {
        ExecutionMode::Parallel
    }

    fn output_capacity(&self) -> Capacity {
        self.options().output_capacity
    }

    async fn run(
        self: Box<Self>,
        input: FlowReceiver<H::Input>,
        output: FlowSender<H::Output>,
        ctx: RunContext,
    ) -> StageReport {
        worker::fan_out::<H>(Arc::from(self), input, output, ctx).await
    }
}

/// Builder-style setters shared by every configurable stage.
pub trait StageExt: Sized {
    /// Type of the values the stage emits.
    type Emits;

    fn stage_options_mut(&mut self) -> &mut StageOptions<Self::Emits>;

    /// Derive downstream metadata from each emitted value.
    fn with_meta_func<F>(mut self, meta_func: F) -> Self
    where
        F: Fn(&Self::Emits, MetaData) -> MetaData + Send + Sync + 'static,
    {
        self.stage_options_mut().meta_func = Some(Arc::new(meta_func));
        self
    }

    fn with_output_capacity(mut self, capacity: Capacity) -> Self {
        self.stage_options_mut().output_capacity = capacity;
        self
    }

    fn with_name(mut self, name: impl Into<String>) -> Self {
        self.stage_options_mut().name = Some(name.into());
        self
    }
}

impl<H: ItemHandler> StageExt for H {
    type Emits = H::Output;

    fn stage_options_mut(&mut self) -> &mut StageOptions<H::Output> {
        self.options_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::flow_channel;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_passes_meta_through() {
        let (tx, mut rx) = flow_channel::<u32>(Capacity::Unbounded);
        let emitter = Emitter::new(tx, None);
        let mut meta = MetaData::new();
        meta.insert("league".into(), json!("pro"));

        emitter.emit(5, meta.clone()).await.unwrap();

        let got = rx.try_recv().unwrap().into_value().unwrap();
        assert_eq!(got, FlowValue::with_meta(5, meta));
    }

    #[tokio::test]
    async fn test_emit_applies_meta_func() {
        let (tx, mut rx) = flow_channel::<u32>(Capacity::Unbounded);
        let derive: MetaFunc<u32> = Arc::new(|value, mut meta| {
            meta.insert("doubled".into(), json!(value * 2));
            meta
        });
        let emitter = Emitter::new(tx, Some(derive));

        emitter.emit(21, MetaData::new()).await.unwrap();

        let got = rx.try_recv().unwrap().into_value().unwrap();
        assert_eq!(got.meta.get("doubled"), Some(&json!(42)));
    }

    #[test]
    fn test_stage_options_default() {
        let options = StageOptions::<u8>::default();
        assert!(options.name.is_none());
        assert!(options.meta_func.is_none());
        assert_eq!(options.output_capacity, Capacity::Unbounded);
    }
}
