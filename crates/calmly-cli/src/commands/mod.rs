pub mod common;
pub mod completions;
pub mod dlq;
pub mod journal;
pub mod mood;
pub mod sync;
