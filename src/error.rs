//! Standard error type for xkrt.

use crate::device::DeviceId;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the device arena allocator (§4.5, §7).
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("device {0:?}: out of memory after {1} eviction passes ({2} bytes requested)")]
    OutOfMemory(DeviceId, u32, usize),
    #[error("device {0:?}: allocation request of 0 bytes")]
    ZeroSizedRequest(DeviceId),
}

/// Errors raised by the per-device offloader (§4.6, §7).
#[derive(Debug, thiserror::Error)]
pub enum OffloaderError {
    #[error("device {0:?}: {1:?} stream ring is full (capacity {2}); raise OFFLOADER_CAPACITY")]
    StreamRingFull(DeviceId, crate::offloader::StreamKind, usize),
    #[error("device {0:?}: no stream of kind {1:?} configured")]
    NoSuchStream(DeviceId, crate::offloader::StreamKind),
}

/// Errors raised while validating or combining driver backends.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("invalid driver combination: {0}")]
    InvalidCombination(String),
    #[error("driver command failed: {0}")]
    CommandFailed(String),
    #[error("no driver registered for device {0:?}")]
    Unregistered(DeviceId),
}

/// Errors raised while loading `RuntimeConfig` from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors raised by the coherency engine.
#[derive(Debug, thiserror::Error)]
pub enum CoherencyError {
    #[error("replica of block exceeds ALLOC_VIEWS_MAX ({0}) distinct allocation views")]
    TooManyAllocationViews(usize),
    #[error("no device holds a coherent replica to source a fetch from")]
    NoCoherentSource,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Offloader(#[from] OffloaderError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Coherency(#[from] CoherencyError),
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn other<S: Into<String>>(desc: S) -> Error {
        Error::Other(desc.into())
    }
}

/// Logs a contract violation detected on a worker thread and aborts the
/// process. Per §7, no error kind on the hot path is exposed to user code
/// as a `Result` once it has crossed into an asynchronous callback: there
/// is no caller frame left to hand a `Result` back to, so the reference
/// policy (diagnostic logging followed by termination) is reproduced here
/// rather than silently swallowing the failure.
pub fn fatal(err: impl fmt::Display) -> ! {
    log::error!(target: "xkrt::fatal", "{}", err);
    std::process::abort()
}
