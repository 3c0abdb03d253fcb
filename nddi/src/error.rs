use thiserror::Error;

/// Errors surfaced by the display interface.
///
/// The first four kinds are reported to the driver, which may retry at frame
/// granularity. `ProtocolViolation` aborts log playback. `CacheConsistency`
/// indicates a tiler bug and is fatal.
#[derive(Error, Debug)]
pub enum NddiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not a valid pixel byte sign mode")]
    InvalidSignMode(u32),

    #[error("region {start:?}..={end:?} is out of range for memory of size {size:?}")]
    OutOfRange {
        start: Vec<u32>,
        end: Vec<u32>,
        size: Vec<u32>,
    },

    #[error("display has not been initialised")]
    NotInitialised,

    #[error("transport failed: {0}")]
    TransportFailed(#[from] std::io::Error),

    #[error("unknown command tag {0} in stream")]
    ProtocolViolation(u32),

    #[error("tile cache consistency violated: {0}")]
    CacheConsistency(String),
}

pub type Result<T> = std::result::Result<T, NddiError>;
