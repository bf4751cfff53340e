//! Value-to-value stages.

use crate::pipeline::{Emitter, ItemHandler, StageOptions};
use async_trait::async_trait;
use micropipe_shared::{FlowValue, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

/// Maps each value with a synchronous function; metadata passes through.
pub struct Transform<I, O, F> {
    transformer: F,
    options: StageOptions<O>,
    _input: PhantomData<fn(I)>,
}

impl<I, O, F> Transform<I, O, F>
where
    F: Fn(&FlowValue<I>) -> O,
{
    pub fn new(transformer: F) -> Self {
        Self {
            transformer,
            options: StageOptions::default(),
            _input: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F> ItemHandler for Transform<I, O, F>
where
    I: Debug + Send + Sync + 'static,
    O: Send + 'static,
    F: Fn(&FlowValue<I>) -> O + Send + Sync + 'static,
{
    type Input = I;
    type Output = O;

    fn kind(&self) -> &'static str {
        "Transform"
    }

    fn options(&self) -> &StageOptions<O> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<O> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<I>, out: &Emitter<O>) -> PipelineResult<bool> {
        let transformed = (self.transformer)(item);
        out.emit(transformed, item.meta.clone()).await?;
        Ok(true)
    }
}

/// Retry behaviour for fallible asynchronous handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retry_limit: u32,
    /// Pause between attempts.
    #[serde(with = "duration_secs")]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 5,
            retry_delay: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            retry_limit: 0,
            retry_delay: Duration::ZERO,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }

    /// Call `attempt` until it succeeds or every attempt has failed.
    ///
    /// Sleeps `retry_delay` between attempts, never after the last one.
    /// Returns `None` once the attempts are used up.
    pub(crate) async fn run<T, F, Fut>(&self, stage: &str, mut attempt: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut remaining = self.attempts();

        while remaining > 0 {
            remaining -= 1;
            match attempt().await {
                Ok(value) => return Some(value),
                Err(e) => {
                    tracing::warn!(
                        stage = %stage,
                        error = %e,
                        "Handler failed ({} tries remaining)",
                        remaining
                    );
                    if remaining > 0 {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        tracing::warn!(stage = %stage, "Max retries reached, losing value from flow");
        None
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Maps each value with a fallible asynchronous function, retrying failures.
///
/// Each attempt gets its own copy of the incoming value. After the last
/// attempt fails the value is dropped into the lost-value ledger.
pub struct AsyncTransform<I, O, F> {
    transformer: F,
    retry: RetryPolicy,
    options: StageOptions<O>,
    _input: PhantomData<fn(I)>,
}

impl<I, O, F, Fut> AsyncTransform<I, O, F>
where
    F: Fn(FlowValue<I>) -> Fut,
    Fut: Future<Output = PipelineResult<O>>,
{
    pub fn new(transformer: F) -> Self {
        Self {
            transformer,
            retry: RetryPolicy::default(),
            options: StageOptions::default(),
            _input: PhantomData,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl<I, O, F, Fut> ItemHandler for AsyncTransform<I, O, F>
where
    I: Clone + Debug + Send + Sync + 'static,
    O: Send + 'static,
    F: Fn(FlowValue<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<O>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn kind(&self) -> &'static str {
        "AsyncTransform"
    }

    fn options(&self) -> &StageOptions<O> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<O> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<I>, out: &Emitter<O>) -> PipelineResult<bool> {
        let stage = crate::pipeline::Stage::name(self);
        match self.retry.run(stage, || (self.transformer)(item.clone())).await {
            Some(transformed) => {
                out.emit(transformed, item.meta.clone()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Pipeline, StageExt};
    use micropipe_shared::PipelineError;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_transform_keeps_meta() {
        let pipeline = Pipeline::builder()
            .pipe(Transform::new(|v: &FlowValue<u32>| format!("#{}", v.value)))
            .build()
            .unwrap();
        let mut meta = micropipe_shared::MetaData::new();
        meta.insert("id".into(), json!(7));

        let run = pipeline.pump(vec![FlowValue::with_meta(3u32, meta)]).await;

        assert_eq!(run.values[0].value, "#3");
        assert_eq!(run.values[0].meta["id"], json!(7));
    }

    #[tokio::test]
    async fn test_meta_func_replaces_meta() {
        let stage = Transform::new(|v: &FlowValue<u32>| v.value + 1).with_meta_func(|v: &u32, _| {
            let mut meta = micropipe_shared::MetaData::new();
            meta.insert("next".into(), json!(v));
            meta
        });
        let pipeline = Pipeline::builder().pipe(stage).build().unwrap();

        let run = pipeline.pump(vec![1u32]).await;

        assert_eq!(run.values[0].meta.len(), 1);
        assert_eq!(run.values[0].meta["next"], json!(2));
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_limit, 5);
        assert_eq!(policy.retry_delay, Duration::from_secs(15));
        assert_eq!(policy.attempts(), 6);
        assert_eq!(RetryPolicy::no_retry().attempts(), 1);
    }

    #[test]
    fn test_retry_policy_from_json() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"retry_delay": 0.5}"#).unwrap();
        assert_eq!(policy.retry_limit, 5);
        assert_eq!(policy.retry_delay, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_transform_recovers_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let stage = AsyncTransform::new(move |v: FlowValue<u32>| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::Handler("flaky".into()))
                } else {
                    Ok(v.value * 2)
                }
            }
        })
        .with_retry(RetryPolicy {
            retry_limit: 3,
            retry_delay: Duration::from_secs(15),
        });
        let pipeline = Pipeline::builder().pipe(stage).build().unwrap();

        let start = tokio::time::Instant::now();
        let run = pipeline.pump(vec![21u32]).await;

        assert_eq!(run.into_values(), vec![42]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_transform_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let stage = AsyncTransform::new(move |_: FlowValue<u32>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(PipelineError::Handler("down".into())) }
        })
        .with_retry(RetryPolicy {
            retry_limit: 2,
            retry_delay: Duration::from_secs(1),
        });
        let pipeline = Pipeline::builder().pipe(stage).build().unwrap();

        let start = tokio::time::Instant::now();
        let run = pipeline.pump(vec![5u32]).await;

        assert!(run.values.is_empty());
        assert_eq!(run.lost.len(), 1);
        assert_eq!(run.lost[0].stage, "AsyncTransform");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // no pause after the final attempt
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
