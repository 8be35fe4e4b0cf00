//! Supporting services: progress reporting and session file storage

pub mod progress;
pub mod storage;

pub use progress::{ConsoleProgressReporter, NoOpProgressReporter, ProgressReporter, ProgressUpdate};
pub use storage::SessionStorage;
