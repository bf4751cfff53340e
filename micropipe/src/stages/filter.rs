use crate::pipeline::{Emitter, ItemHandler, StageOptions};
use async_trait::async_trait;
use micropipe_shared::{FlowValue, PipelineResult};
use std::fmt::Debug;

/// Keeps the values a predicate accepts.
///
/// A rejected value is handled successfully; it is not recorded as lost.
pub struct Filter<T, P> {
    should_keep: P,
    options: StageOptions<T>,
}

impl<T, P> Filter<T, P>
where
    P: Fn(&FlowValue<T>) -> bool,
{
    pub fn new(should_keep: P) -> Self {
        Self {
            should_keep,
            options: StageOptions::default(),
        }
    }
}

#[async_trait]
impl<T, P> ItemHandler for Filter<T, P>
where
    T: Clone + Debug + Send + Sync + 'static,
    P: Fn(&FlowValue<T>) -> bool + Send + Sync + 'static,
{
    type Input = T;
    type Output = T;

    fn kind(&self) -> &'static str {
        "Filter"
    }

    fn options(&self) -> &StageOptions<T> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<T> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<T>, out: &Emitter<T>) -> PipelineResult<bool> {
        if (self.should_keep)(item) {
            out.emit(item.value.clone(), item.meta.clone()).await?;
        }
        Ok(true)
    }
}
