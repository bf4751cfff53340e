//! Side effects on values that keep flowing.

use crate::pipeline::{Emitter, ItemHandler, StageOptions};
use async_trait::async_trait;
use micropipe_shared::{FlowValue, PipelineError, PipelineResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// What the side-effect function of a [`Passthrough`] is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyMode {
    /// The forwarded value itself.
    #[default]
    None,
    /// A clone of the value.
    Shallow,
    /// A copy rebuilt from its serialized form, sharing nothing with the
    /// forwarded value.
    Deep,
}

type DeepCopy<T> = fn(&FlowValue<T>) -> PipelineResult<FlowValue<T>>;

fn deep_copy<T: Serialize + DeserializeOwned>(item: &FlowValue<T>) -> PipelineResult<FlowValue<T>> {
    let encoded = serde_json::to_value(item)?;
    Ok(serde_json::from_value(encoded)?)
}

/// Runs a side-effect function on every value, then forwards it unchanged.
///
/// The forwarded value is always the original; the copy mode only decides
/// what the function sees. A value whose side effect fails (panics, or its
/// deep copy cannot be made) is lost and never forwarded.
pub struct Passthrough<T, F> {
    func: F,
    copy_mode: CopyMode,
    deep_copy: Option<DeepCopy<T>>,
    options: StageOptions<T>,
}

impl<T, F> Passthrough<T, F>
where
    T: Clone,
    F: Fn(&FlowValue<T>),
{
    /// Hand the function the forwarded value (`CopyMode::None`).
    pub fn new(func: F) -> Self {
        Self {
            func,
            copy_mode: CopyMode::None,
            deep_copy: None,
            options: StageOptions::default(),
        }
    }

    /// Hand the function a clone of the value (`CopyMode::Shallow`).
    pub fn shallow(func: F) -> Self {
        Self {
            copy_mode: CopyMode::Shallow,
            ..Self::new(func)
        }
    }

    pub fn copy_mode(&self) -> CopyMode {
        self.copy_mode
    }
}

impl<T, F> Passthrough<T, F>
where
    T: Clone + Serialize + DeserializeOwned,
    F: Fn(&FlowValue<T>),
{
    /// Hand the function a serialized round-trip copy (`CopyMode::Deep`).
    pub fn deep(func: F) -> Self {
        Self {
            copy_mode: CopyMode::Deep,
            deep_copy: Some(deep_copy::<T>),
            ..Self::new(func)
        }
    }
}

#[async_trait]
impl<T, F> ItemHandler for Passthrough<T, F>
where
    T: Clone + Debug + Send + Sync + 'static,
    F: Fn(&FlowValue<T>) + Send + Sync + 'static,
{
    type Input = T;
    type Output = T;

    fn kind(&self) -> &'static str {
        "Passthrough"
    }

    fn options(&self) -> &StageOptions<T> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<T> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<T>, out: &Emitter<T>) -> PipelineResult<bool> {
        // the side effect must succeed before anything goes downstream
        match self.copy_mode {
            CopyMode::None => (self.func)(item),
            CopyMode::Shallow => (self.func)(&item.clone()),
            CopyMode::Deep => {
                let copier = self.deep_copy.ok_or_else(|| {
                    PipelineError::Internal("deep copy requested without a copier".into())
                })?;
                (self.func)(&copier(item)?);
            }
        }

        out.emit(item.value.clone(), item.meta.clone()).await?;
        Ok(true)
    }
}
