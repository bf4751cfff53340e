//! The default fan-out run loop.

use super::handler::{Emitter, ItemHandler};
use super::metrics::StageReport;
use super::stage::Stage;
use crate::channel::{Capacity, FlowReceiver, FlowSender};
use crate::context::RunContext;
use futures::FutureExt;
use micropipe_shared::{Flow, FlowValue};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Read the input until the sentinel, dispatching one task per item, wait
/// for every dispatched task, then forward a single sentinel.
///
/// Channel capacity is the only throttle. A bounded input of capacity `n`
/// caps the stage at `n` handlers in flight; emitting into a full bounded
/// output suspends the dispatched task.
pub(crate) async fn fan_out<H: ItemHandler>(
    handler: Arc<H>,
    mut input: FlowReceiver<H::Input>,
    output: FlowSender<H::Output>,
    ctx: RunContext,
) -> StageReport {
    let name: Arc<str> = Arc::from(Stage::name(handler.as_ref()));
    let emitter = Emitter::new(output.clone(), handler.options().meta_func.clone());
    let in_flight = match input.capacity() {
        Capacity::Bounded(n) => Some(Arc::new(Semaphore::new(n.max(1)))),
        Capacity::Unbounded => None,
    };
    let mut tasks = JoinSet::new();
    let mut scheduled: u64 = 0;

    loop {
        let permit = match &in_flight {
            Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
            None => None,
        };

        match input.recv().await {
            Some(Flow::Value(item)) => {
                scheduled += 1;
                let dispatched = shield(
                    Arc::clone(&handler),
                    item,
                    emitter.clone(),
                    ctx.clone(),
                    Arc::clone(&name),
                );
                tasks.spawn(async move {
                    let _permit = permit;
                    dispatched.await
                });
            }
            Some(Flow::End) => break,
            None => {
                tracing::warn!(stage = %name, "Input closed without end of flow");
                break;
            }
        }
    }

    let mut succeeded: u64 = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(true) => succeeded += 1,
            Ok(false) => {}
            Err(e) => tracing::error!(stage = %name, error = %e, "Dispatched task aborted"),
        }
    }

    let report = StageReport::new(scheduled, succeeded);
    log_completion(&name, &report);

    drop(emitter);
    if output.send_end().await.is_err() {
        tracing::warn!(stage = %name, "Output closed before end of flow could be sent");
    }

    report
}

/// Run the handler for one item, converting every failure mode into a
/// ledger entry.
async fn shield<H: ItemHandler>(
    handler: Arc<H>,
    item: FlowValue<H::Input>,
    emitter: Emitter<H::Output>,
    ctx: RunContext,
    stage: Arc<str>,
) -> bool {
    let outcome = AssertUnwindSafe(handler.handle(&item, &emitter))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(true)) => None,
        Ok(Ok(false)) => Some("handler reported failure".to_string()),
        Ok(Err(e)) => {
            tracing::warn!(stage = %stage, error = %e, "Handler error");
            Some(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(stage = %stage, panic = %message, "Handler panicked");
            Some(format!("handler panicked: {}", message))
        }
    };

    match failure {
        None => {
            ctx.record_flowed();
            true
        }
        Some(reason) => {
            ctx.record_lost(&stage, reason, item);
            false
        }
    }
}

pub(crate) fn log_completion(stage: &str, report: &StageReport) {
    match report.success_pct() {
        Some(pct) => tracing::info!(
            stage = %stage,
            succeeded = report.succeeded,
            scheduled = report.scheduled,
            "{} / {} ({:.1} %) tasks completed successfully",
            report.succeeded,
            report.scheduled,
            pct
        ),
        None => tracing::info!(stage = %stage, "No tasks scheduled"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
