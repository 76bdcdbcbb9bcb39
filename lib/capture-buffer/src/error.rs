use snafu::Snafu;

/// Errors that can occur while constructing a [`crate::CircularBuffer`].
///
/// These are configuration-time errors only. Once a buffer exists, violating its
/// operational contract (double `start_write`, `release_write_block` while inactive,
/// and so on) is a programmer error and panics rather than returning a `Result` —
/// see the module-level docs on [`crate::CircularBuffer`] for the full list.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum BufferBuildError {
    #[snafu(display("block_size must be non-zero"))]
    ZeroBlockSize,

    #[snafu(display("block_count must be at least 2, got {block_count}"))]
    TooFewBlocks { block_count: usize },
}
