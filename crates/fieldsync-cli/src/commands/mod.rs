pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod enqueue;
pub mod queue;
pub mod status;
pub mod sync;
