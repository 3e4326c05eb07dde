// error.rs — closed error taxonomy for the protocol engine

use crate::*;

/// Errors raised by the MT frame codec (C1).
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("frame does not start with 0xFE")]
    BadStart,
    #[error("declared length {declared} exceeds available {available} bytes")]
    Truncated { declared: usize, available: usize },
    #[error("CRC mismatch: expected {expected:02X}, got {actual:02X}")]
    CrcMismatch { expected: u8, actual: u8 },
}

/// Errors raised by calls into [`Core`](crate::Core) outside of polling.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("frame corrupt: {0}")]
    Corrupt(#[from] CodecError),
    #[error("serial transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by [`Core::poll_inverter`](crate::Core::poll_inverter).
///
/// `RadioUnhealthy` from spec §7 is not a variant here: it is the
/// scheduler's interpretation of `ping_radio() == false`, not something the
/// engine raises.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("radio reports no route to inverter")]
    NoRoute,
    #[error("no measurement received within the response window")]
    Timeout,
    #[error("measurement received but implausible (DC voltages near zero)")]
    DataError,
    #[error(transparent)]
    Core(#[from] CoreError),
}
// EOF
