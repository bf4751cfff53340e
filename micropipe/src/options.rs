//! Pipeline-level configuration.

use crate::channel::Capacity;
use micropipe_shared::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options applied to a whole pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Capacity of the seed channel feeding the first stage.
    pub input_capacity: Capacity,
    /// Dump every lost value at `debug` level in the run summary.
    pub log_lost_values: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            input_capacity: Capacity::Unbounded,
            log_lost_values: true,
        }
    }
}

impl PipelineOptions {
    pub fn from_json_str(json: &str) -> PipelineResult<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.input_capacity.validate().map_err(|e| {
            PipelineError::Config(format!("invalid input_capacity: {}", e))
        })
    }

    pub fn with_input_capacity(mut self, capacity: Capacity) -> Self {
        self.input_capacity = capacity;
        self
    }
}
