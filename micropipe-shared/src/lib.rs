//! Types shared between the micropipe engine and stage implementations.

pub mod errors;
pub mod flow;

pub use errors::{PipelineError, PipelineResult};
pub use flow::{Flow, FlowValue, MetaData};
