pub mod debouncer;
pub mod emitter;

pub use debouncer::Debouncer;
pub use emitter::Emitter;

use crate::storage::StorageError;
use thiserror::Error;

/// Errors from one sink. Never fatal: the caller logs them and moves on.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("sink {sink}: writing a bulk of {records} records failed: {source}")]
    Flush {
        sink: String,
        records: usize,
        #[source]
        source: StorageError,
    },

    #[error("sink {sink}: cleanup failed: {source}")]
    Cleanup {
        sink: String,
        #[source]
        source: StorageError,
    },
}
