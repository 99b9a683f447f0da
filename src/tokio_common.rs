//! Common data structures, errors and serial settings of the `tokio` based
//! session layer.
use crate::protocol as proto;
use std::time::Duration;

/// Represents all possible errors of a running session.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps encoder and decoder errors.
    #[error(transparent)]
    Engine(#[from] crate::Error),

    /// The transport failed to read or write.
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// No response arrived in time.
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// The reader task has stopped, no more frames will arrive.
    #[error("Session closed")]
    Closed,
}

/// The result type for session operations.
pub type Result<T> = std::result::Result<T, crate::tokio_common::Error>;

/// The parity used for serial communication.
pub const PARITY: &tokio_serial::Parity = &tokio_serial::Parity::None;
/// The number of stop bits used for serial communication.
pub const STOP_BITS: &tokio_serial::StopBits = &tokio_serial::StopBits::One;
/// The number of data bits used for serial communication.
pub const DATA_BITS: &tokio_serial::DataBits = &tokio_serial::DataBits::Eight;

/// Creates a `tokio_serial::SerialPortBuilder` with the specified settings.
///
/// # Arguments
///
/// * `device` - The path to the serial port device (e.g., `/dev/ttyUSB0`).
/// * `baud_rate` - The baud rate for the serial communication.
pub fn serial_port_builder(
    device: &str,
    baud_rate: &proto::BaudRate,
) -> tokio_serial::SerialPortBuilder {
    tokio_serial::new(device, u32::from(*baud_rate))
        .parity(*PARITY)
        .stop_bits(*STOP_BITS)
        .data_bits(*DATA_BITS)
        .flow_control(tokio_serial::FlowControl::None)
}

/// Modbus floor for the inter-frame silence at high baud rates.
const MIN_INTER_FRAME_DELAY_MICROS: u64 = 1_750;

/// Minimum silence between two RTU frames: 3.5 character times.
///
/// A character is counted as 11 bits (start, 8 data, parity or second stop,
/// stop). Above 19200 baud the Modbus serial line fixes the silence at
/// 1.75 ms.
pub fn minimum_rtu_delay(baud_rate: &proto::BaudRate) -> Duration {
    let bits_per_char = 11.0;
    let char_time_secs = bits_per_char / f64::from(u32::from(*baud_rate));
    let delay_micros = (3.5 * char_time_secs * 1_000_000.0) as u64;
    Duration::from_micros(delay_micros.max(MIN_INTER_FRAME_DELAY_MICROS))
}
