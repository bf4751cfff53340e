//! Bundled stages.
//!
//! `FlowGenerator`, `RateLimit` and the collectors run their own loops; the
//! rest are item handlers driven by the fan-out worker.

mod collect;
mod filter;
mod flatten;
mod generator;
mod passthrough;
mod rate_limit;
mod request;
mod sqlite_query;
mod store_file;
mod transform;
mod url_generator;

pub use collect::{BatchContainer, Collect, CollectDeque, CollectList, SpillDeque};
pub use filter::Filter;
pub use flatten::Flatten;
pub use generator::FlowGenerator;
pub use passthrough::{CopyMode, Passthrough};
pub use rate_limit::RateLimit;
pub use request::{Request, decode_json, decode_text};
pub use sqlite_query::{AllRows, EachRow, RowFlow, SqlParams, SqlQuery, SqliteQuery};
pub use store_file::StoreFile;
pub use transform::{AsyncTransform, RetryPolicy, Transform};
pub use url_generator::UrlGenerator;
