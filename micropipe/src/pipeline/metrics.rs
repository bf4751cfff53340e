use crate::pipeline::ExecutionMode;
use std::fmt;

/// What a stage's run loop reports back when it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Items read from the input channel and dispatched.
    pub scheduled: u64,
    /// Items handled successfully.
    pub succeeded: u64,
}

impl StageReport {
    pub fn new(scheduled: u64, succeeded: u64) -> Self {
        Self {
            scheduled,
            succeeded,
        }
    }

    pub fn failed(&self) -> u64 {
        self.scheduled.saturating_sub(self.succeeded)
    }

    /// Success percentage, or `None` when nothing was scheduled.
    pub fn success_pct(&self) -> Option<f64> {
        percent(self.succeeded, self.scheduled)
    }
}

#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub index: usize,
    pub name: String,
    pub execution: ExecutionMode,
    pub scheduled: u64,
    pub succeeded: u64,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    /// Values that entered the system from seeds or a source stage.
    pub values_entered: u64,
    /// Items handled successfully by any stage.
    pub values_flowed: u64,
    /// Items dropped anywhere in the chain.
    pub values_lost: u64,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn stage(&self, name: &str) -> Option<&StageMetrics> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn stage_duration_ms(&self, name: &str) -> Option<u128> {
        self.stage(name).map(|stage| stage.duration_ms)
    }

    /// Percentage of handled items that were not lost.
    ///
    /// `None` when no item was handled or lost at all.
    pub fn success_rate(&self) -> Option<f64> {
        percent(self.values_flowed, self.values_flowed + self.values_lost)
    }
}

impl fmt::Display for PipelineMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.success_rate() {
            Some(pct) => write!(
                f,
                "{} lost of {} values flowed ({:.2} % success) in {} ms",
                self.values_lost, self.values_flowed, pct, self.total_duration_ms
            ),
            None => write!(
                f,
                "no data: nothing flowed or was lost in {} ms",
                self.total_duration_ms
            ),
        }
    }
}

pub(crate) fn percent(part: u64, whole: u64) -> Option<f64> {
    if whole == 0 {
        None
    } else {
        Some(part as f64 / whole as f64 * 100.0)
    }
}
