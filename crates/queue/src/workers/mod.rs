//! Built-in task handlers.

mod cleanup;

pub use cleanup::CleanupWorker;
