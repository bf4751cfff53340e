use crate::pipeline::{Emitter, ItemHandler, StageOptions};
use async_trait::async_trait;
use micropipe_shared::{FlowValue, PipelineResult};
use std::fmt::Debug;
use std::marker::PhantomData;

/// Emits every element of an incoming `Vec` as its own value, each carrying
/// the incoming metadata.
pub struct Flatten<T> {
    options: StageOptions<T>,
    _items: PhantomData<fn(T)>,
}

impl<T> Flatten<T> {
    pub fn new() -> Self {
        Self {
            options: StageOptions::default(),
            _items: PhantomData,
        }
    }
}

impl<T> Default for Flatten<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> ItemHandler for Flatten<T>
where
    T: Clone + Debug + Send + Sync + 'static,
{
    type Input = Vec<T>;
    type Output = T;

    fn kind(&self) -> &'static str {
        "Flatten"
    }

    fn options(&self) -> &StageOptions<T> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<T> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<Vec<T>>, out: &Emitter<T>) -> PipelineResult<bool> {
        for element in &item.value {
            out.emit(element.clone(), item.meta.clone()).await?;
        }
        Ok(true)
    }
}
