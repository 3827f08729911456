//! Error types for fieldkit-bus.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by the bus transport for a single block transfer.
///
/// Mirrors the status codes returned by the two-wire peripheral driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusErrorKind {
    /// Block did not fit the transmit buffer.
    #[error("data too long")]
    DataTooLong,
    /// Nobody acknowledged the address byte.
    #[error("address not acknowledged")]
    AddressNack,
    /// The peripheral stopped acknowledging mid-block.
    #[error("data not acknowledged")]
    DataNack,
    /// Anything else the driver could not classify.
    #[error("other bus failure")]
    Other,
}

/// Main error type for all bus, pool and protocol operations.
#[derive(Debug, Error)]
pub enum FieldkitError {
    /// Pool has no room for the requested allocation.
    #[error("pool '{pool}' exhausted: requested {requested} bytes, {remaining} remaining")]
    PoolExhausted {
        pool: String,
        requested: usize,
        remaining: usize,
    },

    /// A block was read after its pool was emptied.
    #[error("block from generation {block} used after pool '{pool}' was emptied (generation {current})")]
    StaleBlock {
        pool: String,
        block: u32,
        current: u32,
    },

    /// A child pool was used after an ancestor was emptied.
    #[error("pool '{0}' was released by an emptied ancestor")]
    PoolReleased(String),

    /// `free()` was called on a pool carved from a parent.
    #[error("pool '{0}' has a parent and cannot be freed")]
    NotRootPool(String),

    /// Encoded message does not fit in a single bus frame.
    #[error("frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// Malformed or truncated frame.
    #[error("decode error: {0}")]
    Decode(String),

    /// Transport failure talking to a peripheral.
    #[error("bus error at address {address}: {kind}")]
    Bus { address: u8, kind: BusErrorKind },

    /// Peripheral kept answering RETRY (or nothing) until the deadline.
    #[error("no reply from address {address} within {waited:?}")]
    Timeout { address: u8, waited: Duration },

    /// Reading-status drain ran past its time or reading bound.
    #[error("reading drain for address {address} stopped after {readings} readings")]
    DrainLimit { address: u8, readings: usize },

    /// Sensor capabilities were requested for a sensor the module doesn't have.
    #[error("sensor index {index} out of range ({count} sensors)")]
    InvalidSensorIndex { index: u32, count: usize },

    /// Operation not valid in the current module state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FieldkitError {
    /// Shorthand for a decode error with a message.
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        FieldkitError::Decode(message.into())
    }
}

/// Result type alias using FieldkitError.
pub type Result<T> = std::result::Result<T, FieldkitError>;
