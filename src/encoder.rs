//! Builds request frames from request descriptors.
//!
//! A frame is `[slave id][function code][payload...][crc lo][crc hi]` with
//! every 16 bit payload field in big-endian order.
//!
//! # Examples
//!
//! ```
//! use mbterm_lib::encoder::{encode, RequestDescriptor};
//!
//! let request = RequestDescriptor::read_holding_registers(1, 0x0000, 10);
//! let frame = encode(&request).unwrap();
//! assert_eq!(frame.to_string(), "01 03 00 00 00 0A C5 CD");
//! ```

use crate::crc;
use crate::error::{InvalidRequest, Result};
use crate::protocol::{FunctionCode, SlaveId, COIL_OFF, COIL_ON};
use crate::tracker::PendingRequests;
use log::{debug, trace};
use std::fmt;
use std::ops::Deref;

/// Values carried by a write request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestValues {
    /// Read requests carry no values.
    #[default]
    None,
    Coils(Vec<bool>),
    Registers(Vec<u16>),
}

impl RequestValues {
    pub fn len(&self) -> usize {
        match self {
            RequestValues::None => 0,
            RequestValues::Coils(values) => values.len(),
            RequestValues::Registers(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            RequestValues::None => "no",
            RequestValues::Coils(_) => "coil",
            RequestValues::Registers(_) => "register",
        }
    }
}

/// Everything needed to build one request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestDescriptor {
    pub slave_id: u8,
    pub function: FunctionCode,
    pub start_address: u16,
    pub quantity: u16,
    pub values: RequestValues,
}

impl RequestDescriptor {
    fn read(slave_id: u8, function: FunctionCode, start_address: u16, quantity: u16) -> Self {
        Self {
            slave_id,
            function,
            start_address,
            quantity,
            values: RequestValues::None,
        }
    }

    pub fn read_coils(slave_id: u8, start_address: u16, quantity: u16) -> Self {
        Self::read(slave_id, FunctionCode::ReadCoils, start_address, quantity)
    }

    pub fn read_discrete_inputs(slave_id: u8, start_address: u16, quantity: u16) -> Self {
        Self::read(
            slave_id,
            FunctionCode::ReadDiscreteInputs,
            start_address,
            quantity,
        )
    }

    pub fn read_holding_registers(slave_id: u8, start_address: u16, quantity: u16) -> Self {
        Self::read(
            slave_id,
            FunctionCode::ReadHoldingRegisters,
            start_address,
            quantity,
        )
    }

    pub fn read_input_registers(slave_id: u8, start_address: u16, quantity: u16) -> Self {
        Self::read(
            slave_id,
            FunctionCode::ReadInputRegisters,
            start_address,
            quantity,
        )
    }

    pub fn write_single_coil(slave_id: u8, address: u16, value: bool) -> Self {
        Self {
            slave_id,
            function: FunctionCode::WriteSingleCoil,
            start_address: address,
            quantity: 1,
            values: RequestValues::Coils(vec![value]),
        }
    }

    pub fn write_single_register(slave_id: u8, address: u16, value: u16) -> Self {
        Self {
            slave_id,
            function: FunctionCode::WriteSingleRegister,
            start_address: address,
            quantity: 1,
            values: RequestValues::Registers(vec![value]),
        }
    }

    /// The quantity is taken from the number of values.
    pub fn write_multiple_coils(slave_id: u8, start_address: u16, values: Vec<bool>) -> Self {
        Self {
            slave_id,
            function: FunctionCode::WriteMultipleCoils,
            start_address,
            quantity: u16::try_from(values.len()).unwrap_or(u16::MAX),
            values: RequestValues::Coils(values),
        }
    }

    /// The quantity is taken from the number of values.
    pub fn write_multiple_registers(slave_id: u8, start_address: u16, values: Vec<u16>) -> Self {
        Self {
            slave_id,
            function: FunctionCode::WriteMultipleRegisters,
            start_address,
            quantity: u16::try_from(values.len()).unwrap_or(u16::MAX),
            values: RequestValues::Registers(values),
        }
    }

    /// Checks the descriptor without building a frame.
    pub fn validate(&self) -> std::result::Result<(), InvalidRequest> {
        SlaveId::try_from(self.slave_id)?;

        let max = self.function.max_quantity();
        if self.quantity == 0 || self.quantity > max {
            return Err(InvalidRequest::QuantityOutOfRange {
                function: self.function,
                quantity: self.quantity,
                max,
            });
        }

        if self.function.is_read() {
            if !self.values.is_empty() {
                debug!(
                    "Ignoring {} value(s) supplied to {}",
                    self.values.len(),
                    self.function
                );
            }
            return Ok(());
        }

        let kind_matches = match &self.values {
            RequestValues::Coils(_) => self.function.is_coil_write(),
            RequestValues::Registers(_) => !self.function.is_coil_write(),
            RequestValues::None => false,
        };
        if !kind_matches {
            return Err(InvalidRequest::ValueKindMismatch {
                function: self.function,
                provided: self.values.kind(),
            });
        }

        let expected = usize::from(self.quantity);
        if self.values.len() != expected {
            return Err(InvalidRequest::ValueCountMismatch {
                function: self.function,
                expected,
                actual: self.values.len(),
            });
        }
        Ok(())
    }
}

/// A complete, CRC terminated RTU frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame(Vec<u8>);

impl Frame {
    /// Wraps raw bytes that already end in their CRC.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Appends the CRC of `body` and wraps the result.
    pub fn with_crc(mut body: Vec<u8>) -> Self {
        let crc = crc::crc16_bytes(&body);
        body.extend_from_slice(&crc);
        Self(body)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn slave_id(&self) -> Option<u8> {
        self.0.first().copied()
    }

    pub fn function_code(&self) -> Option<u8> {
        self.0.get(1).copied()
    }

    /// The trailing checksum as transmitted.
    pub fn crc(&self) -> Option<u16> {
        match self.0.as_slice() {
            [.., lo, hi] if self.0.len() >= 3 => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }
}

impl Deref for Frame {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::format::to_hex(&self.0))
    }
}

/// Packs coil states into bytes, first coil in bit 0 of the first byte.
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut packed = vec![0u8; values.len().div_ceil(8)];
    for (index, _) in values.iter().enumerate().filter(|(_, on)| **on) {
        packed[index / 8] |= 1 << (index % 8);
    }
    packed
}

/// Builds the frame for `request`.
///
/// Fails with [`crate::Error::InvalidRequest`] before producing any bytes if
/// the descriptor is invalid.
pub fn encode(request: &RequestDescriptor) -> Result<Frame> {
    request.validate()?;

    let mut body = Vec::with_capacity(9 + 2 * usize::from(request.quantity));
    body.push(request.slave_id);
    body.push(u8::from(request.function));
    body.extend_from_slice(&request.start_address.to_be_bytes());

    match (&request.function, &request.values) {
        (FunctionCode::WriteSingleCoil, RequestValues::Coils(values)) => {
            let value = if values[0] { COIL_ON } else { COIL_OFF };
            body.extend_from_slice(&value.to_be_bytes());
        }
        (FunctionCode::WriteSingleRegister, RequestValues::Registers(values)) => {
            body.extend_from_slice(&values[0].to_be_bytes());
        }
        (FunctionCode::WriteMultipleCoils, RequestValues::Coils(values)) => {
            let packed = pack_bits(values);
            body.extend_from_slice(&request.quantity.to_be_bytes());
            // At most 1968 coils, so the byte count fits.
            body.push((packed.len() & 0xFF) as u8);
            body.extend_from_slice(&packed);
        }
        (FunctionCode::WriteMultipleRegisters, RequestValues::Registers(values)) => {
            body.extend_from_slice(&request.quantity.to_be_bytes());
            body.push(((values.len() * 2) & 0xFF) as u8);
            for value in values {
                body.extend_from_slice(&value.to_be_bytes());
            }
        }
        _ => {
            body.extend_from_slice(&request.quantity.to_be_bytes());
        }
    }

    let frame = Frame::with_crc(body);
    trace!("Encoded {}: {frame}", request.function);
    Ok(frame)
}

/// Encodes `request` and, on success, records it in `tracker`.
///
/// Every function code is recorded, writes included, so the tracker always
/// reflects the last request of each kind.
pub fn encode_and_track(request: &RequestDescriptor, tracker: &PendingRequests) -> Result<Frame> {
    let frame = encode(request)?;
    tracker.record(request.function, request.quantity, request.start_address);
    Ok(frame)
}
