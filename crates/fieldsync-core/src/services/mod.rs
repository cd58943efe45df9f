//! Services shared by every client of the engine.

mod store;

pub use store::SyncStore;
