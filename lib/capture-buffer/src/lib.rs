//! A single-writer, multi-reader circular capture buffer.
//!
//! One producer fills fixed-size blocks in order; any number of independent consumers
//! each track their own read cursor and detect, on their own, whether the producer has
//! lapped them before they could keep up. See [`CircularBuffer`] for the concurrency
//! contract.

mod buffer;
mod error;
mod reader;

pub use buffer::{CircularBuffer, ReadOutcome, WriteBlock};
pub use error::BufferBuildError;
pub use reader::{Reader, ReaderStatus};
