#![forbid(unsafe_code)]

//! Runtime error type.

use thiserror::Error;

/// Failures raised by the event loop and zone layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A virtual-time flush ran more timers than allowed.
    #[error(
        "flush failed after reaching the limit of {limit} tasks; \
         does the code under test use a polling timer?"
    )]
    FlushLimitExceeded { limit: usize },

    /// Virtual-time controls were used on a real-time event loop.
    #[error("{operation} requires a virtual-time event loop")]
    RealTimeClock { operation: &'static str },

    /// No zone is active where one is required.
    #[error("no zone is available; run the code inside Zone::run")]
    ZoneUnavailable,

    /// The zone chain has no proxy zone to intercept.
    #[error("expected to be running in a proxy zone ({zone})")]
    ProxyZoneMissing { zone: String },

    /// A has-task hook can only be replaced on a proxy zone.
    #[error("zone {zone} is not a proxy zone; its hooks are fixed at fork time")]
    NotAProxyZone { zone: String },
}

impl RuntimeError {
    /// Convenience for reporting a virtual-time-only operation.
    #[must_use]
    pub(crate) const fn real_time(operation: &'static str) -> Self {
        Self::RealTimeClock { operation }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

