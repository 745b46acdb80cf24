pub mod collection;
pub mod content;
pub mod llm;
pub mod processing;

pub use collection::{Batch, BatchItem, SourceGroup, SummaryRecord};
pub use processing::{BatchStats, Summarizer};
