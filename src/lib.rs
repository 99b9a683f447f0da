//! A Modbus RTU message engine: build request frames, decode response frames
//! and keep a bounded record of the traffic.
//!
//! The engine itself is transport free. It works on byte slices and is made
//! of small, independent parts:
//!
//! - [`crc`]: the Modbus CRC16 that closes every frame.
//! - [`encoder`]: request descriptors to validated, CRC terminated frames.
//! - [`tracker`]: the last request quantity per function code, shared between
//!   the sending and the receiving side. Bit read responses need it because
//!   they only carry a byte count.
//! - [`decoder`]: raw frames to [`decoder::DecodedResponse`] values, with
//!   exception, CRC and unknown function handling.
//! - [`session_log`]: a bounded, shareable ring of sent and received frames.
//! - [`format`] and [`assembler`]: byte rendering and parsing, and optional
//!   reassembly of frames split across serial reads.
//! - [`highlight`]: named byte patterns located in traffic.
//!
//! With the `tokio-session` feature, [`tokio_session::Session`] drives all of
//! the above over any `tokio` byte stream, typically a serial port opened with
//! [`tokio_common::serial_port_builder`].
//!
//! ## Quick Start
//!
//! ```
//! use mbterm_lib::{decoder, encoder, protocol::Direction, tracker::PendingRequests};
//!
//! fn main() -> Result<(), mbterm_lib::Error> {
//!     let tracker = PendingRequests::new();
//!
//!     // Read three coils starting at address 0x0013 of slave 17
//!     let request = encoder::RequestDescriptor::read_coils(17, 0x0013, 3);
//!     let frame = encoder::encode_and_track(&request, &tracker)?;
//!     println!("TX: {frame}");
//!
//!     // The slave answers with one byte of packed coil states
//!     let reply = encoder::Frame::with_crc(vec![0x11, 0x01, 0x01, 0b0000_0101]);
//!     let response = decoder::decode(&reply, Direction::Response, &tracker)?;
//!     assert_eq!(response.bits(), Some(&[true, false, true][..]));
//!     assert_eq!(response.start_address, Some(0x0013));
//!
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod format;
pub mod highlight;
pub mod protocol;
pub mod session_log;
pub mod tracker;

pub use error::{Error, Result};

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-session")))]
#[cfg(feature = "tokio-session")]
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-session")))]
#[cfg(feature = "tokio-session")]
pub mod tokio_session;
