//! Durable storage for extracted items

pub mod memory;
pub mod sqlite_sink;
pub mod traits;

pub use memory::MemorySink;
pub use sqlite_sink::SqliteSink;
pub use traits::{ResultSink, SinkError, SinkResult};
