//! Throughput throttle.

use crate::channel::{Capacity, FlowReceiver, FlowSender};
use crate::context::RunContext;
use crate::pipeline::worker::log_completion;
use crate::pipeline::{Emitter, ExecutionMode, Stage, StageExt, StageOptions, StageReport};
use async_trait::async_trait;
use micropipe_shared::{Flow, PipelineError, PipelineResult};
use std::time::Duration;
use tokio::time::Instant;

/// Forwards values one at a time, never reading two inputs closer together
/// than `1 / max_per_sec`.
///
/// The first value passes without waiting. Bounding the output channel with
/// [`RateLimit::with_concurrency_limit`] caps how many of the next stage's
/// handlers can be in flight at once.
pub struct RateLimit<T> {
    interval: Duration,
    options: StageOptions<T>,
}

impl<T: Send + 'static> RateLimit<T> {
    pub fn new(max_per_sec: f64) -> PipelineResult<Self> {
        if !max_per_sec.is_finite() || max_per_sec <= 0.0 {
            return Err(PipelineError::Config(format!(
                "rate limit must be a positive number of values per second, got {}",
                max_per_sec
            )));
        }

        Ok(Self {
            interval: Duration::from_secs_f64(1.0 / max_per_sec),
            options: StageOptions::default(),
        })
    }

    /// Bound the output channel to `limit` values; 0 leaves it unbounded.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.options.output_capacity = Capacity::from_limit(limit);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl<T> StageExt for RateLimit<T> {
    type Emits = T;

    fn stage_options_mut(&mut self) -> &mut StageOptions<T> {
        &mut self.options
    }
}

#[async_trait]
impl<T: Send + 'static> Stage for RateLimit<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        self.options.name.as_deref().unwrap_or("RateLimit")
    }

    fn execution(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    fn output_capacity(&self) -> Capacity {
        self.options.output_capacity
    }

    async fn run(
        self: Box<Self>,
        mut input: FlowReceiver<T>,
        output: FlowSender<T>,
        _ctx: RunContext,
    ) -> StageReport {
        let name = self.name().to_string();
        let interval = self.interval;
        let emitter = Emitter::new(output.clone(), self.options.meta_func.clone());
        let mut forwarded: u64 = 0;

        loop {
            let started = Instant::now();
            let item = match input.recv().await {
                Some(Flow::Value(item)) => item,
                Some(Flow::End) => break,
                None => {
                    tracing::warn!(stage = %name, "Input closed without end of flow");
                    break;
                }
            };

            if let Err(e) = emitter.emit(item.value, item.meta).await {
                tracing::warn!(stage = %name, error = %e, "Output closed, throttling stopped");
                break;
            }
            forwarded += 1;

            tokio::time::sleep_until(started + interval).await;
        }

        let report = StageReport::new(forwarded, forwarded);
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
    use micropipe_shared::FlowValue;
    use serde_json::json;

    #[test]
    fn test_rejects_non_positive_rate() {
        assert!(matches!(RateLimit::<u8>::new(0.0), Err(PipelineError::Config(_))));
        assert!(matches!(RateLimit::<u8>::new(-2.0), Err(PipelineError::Config(_))));
        assert!(RateLimit::<u8>::new(f64::NAN).is_err());
        assert!(RateLimit::<u8>::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_concurrency_limit_sets_output_capacity() {
        let limited = RateLimit::<u8>::new(2.0).unwrap().with_concurrency_limit(3);
        assert_eq!(limited.output_capacity(), Capacity::Bounded(3));
        assert_eq!(limited.interval(), Duration::from_millis(500));

        let unlimited = RateLimit::<u8>::new(2.0).unwrap().with_concurrency_limit(0);
        assert_eq!(unlimited.output_capacity(), Capacity::Unbounded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_between_values() {
        let (in_tx, in_rx) = flow_channel(Capacity::Unbounded);
        let (out_tx, mut out_rx) = flow_channel(Capacity::Unbounded);
        for i in 0..5u32 {
            in_tx.send_value(FlowValue::new(i)).await.unwrap();
        }
        in_tx.send_end().await.unwrap();

        let start = Instant::now();
        let stage = RateLimit::new(1.0).unwrap().with_meta_func(move |_: &u32, mut meta| {
            meta.insert("at_ms".into(), json!(start.elapsed().as_millis() as u64));
            meta
        });
        let report = Box::new(stage).run(in_rx, out_tx, RunContext::new()).await;

        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(report, StageReport::new(5, 5));

        let mut out = Vec::new();
        while let Some(flow) = out_rx.try_recv() {
            out.push(flow);
        }
        assert_eq!(out.len(), 6);
        assert_eq!(out.iter().filter(|f| f.is_end()).count(), 1);
        assert!(out.last().unwrap().is_end());

        let values: Vec<FlowValue<u32>> = out.into_iter().filter_map(|f| f.into_value()).collect();
        assert_eq!(
            values.iter().map(|v| v.value).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        let stamps: Vec<u64> = values
            .iter()
            .map(|v| v.meta["at_ms"].as_u64().unwrap())
            .collect();
        assert_eq!(stamps[0], 0);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= 1000);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_does_not_wait() {
        let (in_tx, in_rx) = flow_channel::<u8>(Capacity::Unbounded);
        let (out_tx, mut out_rx) = flow_channel(Capacity::Unbounded);
        in_tx.send_end().await.unwrap();

        let start = Instant::now();
        Box::new(RateLimit::new(0.5).unwrap())
            .run(in_rx, out_tx, RunContext::new())
            .await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(out_rx.recv().await, Some(Flow::End));
        assert!(out_rx.try_recv().is_none());
    }
}
