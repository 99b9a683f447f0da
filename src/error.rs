use crate::protocol::FunctionCode;

/// Errors raised by the message engine.
///
/// Device-reported exceptions and CRC mismatches are not errors: they are
/// reported as data on [`crate::decoder::DecodedResponse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The request descriptor cannot be encoded. Nothing was produced.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),

    /// The bytes handed to the decoder do not form a frame.
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] MalformedFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRequest {
    #[error("slave id {0} is out of range (1-247)")]
    SlaveIdOutOfRange(u8),

    #[error("unsupported function code 0x{0:02X}")]
    UnsupportedFunction(u8),

    #[error("quantity {quantity} is out of range for {function} (1-{max})")]
    QuantityOutOfRange {
        function: FunctionCode,
        quantity: u16,
        max: u16,
    },

    #[error("{function} expects {expected} value(s), got {actual}")]
    ValueCountMismatch {
        function: FunctionCode,
        expected: usize,
        actual: usize,
    },

    #[error("{function} cannot be sent with {provided} values")]
    ValueKindMismatch {
        function: FunctionCode,
        provided: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedFrame {
    #[error("frame has {0} byte(s), at least 5 are required")]
    TooShort(usize),

    #[error("'{0}' is not a valid octet")]
    InvalidOctet(String),
}

pub type Result<T> = std::result::Result<T, Error>;
