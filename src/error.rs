//! Error taxonomy for the acquisition side of the gateway.
//!
//! Transport faults (`ProtocolError`) and storage faults (`StoreError`)
//! are deliberately separate types: the acquisition loop retries them
//! under different policies, and neither is allowed to escape a cycle.

use thiserror::Error;

// ---

/// A fault in one request/response exchange with the field device.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No complete response within the per-call deadline.
    #[error("device did not respond within {0} ms")]
    Timeout(u128),

    /// Transport-level failure: broken frame, CRC error, closed port.
    #[error("serial transport error: {0}")]
    Framing(String),

    /// The device answered with a Modbus exception response.
    #[error("device rejected the request: {0}")]
    DeviceNack(String),

    /// Caller passed arguments that can never produce a valid exchange.
    #[error("invalid poll arguments: {0}")]
    InvalidArgument(String),
}

impl ProtocolError {
    /// Whether the acquisition loop may retry this fault within a cycle.
    ///
    /// `InvalidArgument` is a programming or configuration error and is
    /// surfaced immediately; everything else is a transient link fault.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProtocolError::InvalidArgument(_))
    }
}

// ---

/// The device answered with a different register count than the
/// configured map expects. This is a firmware/gateway layout mismatch,
/// not a transient fault: the loop halts and waits for an operator.
#[derive(Debug, Error)]
#[error("register count mismatch: device sent {actual} registers, map expects {expected}")]
pub struct ConfigMismatch {
    pub expected: usize,
    pub actual: usize,
}

// ---

/// A fault while appending to or reading from the sample store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn invalid_argument_is_not_transient() {
        // ---
        assert!(ProtocolError::Timeout(1000).is_transient());
        assert!(ProtocolError::Framing("crc mismatch".into()).is_transient());
        assert!(ProtocolError::DeviceNack("illegal data address".into()).is_transient());
        assert!(!ProtocolError::InvalidArgument("count must be > 0".into()).is_transient());
    }
}
