//! Run-wide shared state threaded into every stage.

use micropipe_shared::{FlowValue, MetaData};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Metadata key naming the stage that dropped a value.
pub const DROP_STAGE_KEY: &str = "drop_stage";

/// A value dropped from the flow, with provenance.
pub struct LostValue {
    /// Name of the stage that dropped the value.
    pub stage: String,
    /// Why it was dropped.
    pub reason: String,
    /// Metadata of the dropped value, with `drop_stage` set.
    pub meta: MetaData,
    value: Box<dyn Any + Send>,
    repr: String,
}

impl LostValue {
    pub(crate) fn new<T>(stage: &str, reason: impl Into<String>, item: FlowValue<T>) -> Self
    where
        T: Debug + Send + 'static,
    {
        let FlowValue { value, mut meta } = item;
        meta.insert(
            DROP_STAGE_KEY.to_string(),
            serde_json::Value::String(stage.to_string()),
        );

        Self {
            stage: stage.to_string(),
            reason: reason.into(),
            meta,
            repr: format!("{:?}", value),
            value: Box::new(value),
        }
    }

    /// Typed access to the dropped payload.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Debug rendering of the dropped payload.
    pub fn repr(&self) -> &str {
        &self.repr
    }
}

impl Debug for LostValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LostValue")
            .field("stage", &self.stage)
            .field("reason", &self.reason)
            .field("value", &self.repr)
            .field("meta", &self.meta)
            .finish()
    }
}

struct RunContextInner {
    run_id: Uuid,
    values_entered: AtomicU64,
    values_flowed: AtomicU64,
    lost: Mutex<Vec<LostValue>>,
}

/// Shared tallies and the lost-value ledger for one pipeline run.
///
/// Cheap to clone; every clone points at the same counters. Counters are
/// lock-free atomics; the ledger sits behind a `parking_lot::Mutex`.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<RunContextInner>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RunContextInner {
                run_id: Uuid::new_v4(),
                values_entered: AtomicU64::new(0),
                values_flowed: AtomicU64::new(0),
                lost: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// Count a value entering the system from a seed or source.
    pub fn record_entered(&self) {
        self.inner.values_entered.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an item a handler processed successfully.
    pub fn record_flowed(&self) {
        self.inner.values_flowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Put a dropped item into the ledger.
    pub fn record_lost<T>(&self, stage: &str, reason: impl Into<String>, item: FlowValue<T>)
    where
        T: Debug + Send + 'static,
    {
        let lost = LostValue::new(stage, reason, item);
        self.inner.lost.lock().push(lost);
    }

    pub fn values_entered(&self) -> u64 {
        self.inner.values_entered.load(Ordering::Relaxed)
    }

    pub fn values_flowed(&self) -> u64 {
        self.inner.values_flowed.load(Ordering::Relaxed)
    }

    pub fn values_lost(&self) -> u64 {
        self.inner.lost.lock().len() as u64
    }

    /// Move the ledger out, leaving it empty.
    pub(crate) fn take_lost(&self) -> Vec<LostValue> {
        std::mem::take(&mut *self.inner.lost.lock())
    }
}

impl Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.inner.run_id)
            .field("values_entered", &self.values_entered())
            .field("values_flowed", &self.values_flowed())
            .field("values_lost", &self.values_lost())
            .finish()
    }
}
