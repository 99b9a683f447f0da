//! Turns received (or transmitted) frames back into structured values.
//!
//! Decoding never fails on protocol content: exception responses, bad
//! checksums, unknown function codes and truncated payloads are all reported
//! on the returned [`DecodedResponse`] so a session keeps rendering whatever
//! arrives. Only byte sequences that cannot be a frame at all (fewer than
//! five bytes, or text that is not made of octets) are rejected.
//!
//! # Examples
//!
//! ```
//! use mbterm_lib::decoder::{decode, Payload};
//! use mbterm_lib::protocol::Direction;
//! use mbterm_lib::tracker::PendingRequests;
//!
//! let tracker = PendingRequests::new();
//! let response = decode(&[0x01, 0x83, 0x02, 0xC0, 0xF1], Direction::Response, &tracker).unwrap();
//! assert!(response.is_exception);
//! assert_eq!(response.function_code, 0x03);
//! assert!(response.crc_valid);
//! ```

use crate::crc;
use crate::error::{MalformedFrame, Result};
use crate::format::{self, InputFormat};
use crate::protocol::{
    Direction, ExceptionCode, FunctionCode, COIL_OFF, COIL_ON, EXCEPTION_BIT, MIN_FRAME_LEN,
};
use crate::tracker::PendingRequests;
use log::{debug, trace, warn};
use std::fmt;

/// Device reported exception carried by an exception response.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExceptionInfo {
    pub code: ExceptionCode,
    pub description: String,
}

/// Values extracted from a frame, shaped by its function code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Payload {
    /// Coil or discrete input states of a bit read response, in address order.
    Bits(Vec<bool>),
    /// Register values of a register read response, in address order.
    Registers(Vec<u16>),
    /// Single coil write, request or echo.
    SingleCoil { address: u16, value: bool },
    /// Single register write, request or echo.
    SingleRegister { address: u16, value: u16 },
    /// Echo of a multiple coil or register write.
    WriteConfirmation { address: u16, quantity: u16 },
    /// An outgoing read request.
    ReadRequest { address: u16, quantity: u16 },
    /// An outgoing multiple coil write.
    WriteCoils { address: u16, values: Vec<bool> },
    /// An outgoing multiple register write.
    WriteRegisters { address: u16, values: Vec<u16> },
    Exception(ExceptionInfo),
    /// Unknown function code or a payload too short to interpret.
    Empty,
}

/// A decoded frame together with everything needed to render it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedResponse {
    pub slave_id: u8,
    /// For exceptions this is the original function code, exception bit cleared.
    pub function_code: u8,
    pub function_name: String,
    pub payload: Payload,
    /// First address the values refer to, when known.
    pub start_address: Option<u16>,
    pub crc_valid: bool,
    pub is_exception: bool,
    pub raw_frame: Vec<u8>,
    pub direction: Direction,
}

impl DecodedResponse {
    pub fn bits(&self) -> Option<&[bool]> {
        match &self.payload {
            Payload::Bits(values) | Payload::WriteCoils { values, .. } => Some(values.as_slice()),
            _ => None,
        }
    }

    pub fn registers(&self) -> Option<&[u16]> {
        match &self.payload {
            Payload::Registers(values) | Payload::WriteRegisters { values, .. } => {
                Some(values.as_slice())
            }
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        match &self.payload {
            Payload::Exception(info) => Some(info),
            _ => None,
        }
    }

    /// Overrides the start address, e.g. with the one from the request that
    /// is known to have caused this response.
    pub fn with_start_address(mut self, start_address: u16) -> Self {
        self.start_address = Some(start_address);
        self
    }
}

fn address_label(start_address: Option<u16>, index: usize) -> String {
    match start_address {
        Some(start) => format!("{}", u32::from(start) + index as u32),
        None => format!("#{index}"),
    }
}

impl fmt::Display for DecodedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} slave {} {} (0x{:02X}) [CRC {}]",
            self.direction,
            self.slave_id,
            self.function_name,
            self.function_code,
            if self.crc_valid { "OK" } else { "INVALID" }
        )?;
        match &self.payload {
            Payload::Bits(values) | Payload::WriteCoils { values, .. } => {
                for (index, value) in values.iter().enumerate() {
                    let state = if *value { "ON" } else { "OFF" };
                    write!(
                        f,
                        "\n  {:>6}: {state}",
                        address_label(self.start_address, index)
                    )?;
                }
            }
            Payload::Registers(values) | Payload::WriteRegisters { values, .. } => {
                for (index, value) in values.iter().enumerate() {
                    write!(
                        f,
                        "\n  {:>6}: {value:>5} (0x{value:04X})",
                        address_label(self.start_address, index)
                    )?;
                }
            }
            Payload::SingleCoil { address, value } => {
                write!(f, "\n  {address:>6}: {}", if *value { "ON" } else { "OFF" })?;
            }
            Payload::SingleRegister { address, value } => {
                write!(f, "\n  {address:>6}: {value:>5} (0x{value:04X})")?;
            }
            Payload::WriteConfirmation { address, quantity } => {
                write!(f, "\n  wrote {quantity} starting at address {address}")?;
            }
            Payload::ReadRequest { address, quantity } => {
                write!(f, "\n  read {quantity} starting at address {address}")?;
            }
            Payload::Exception(info) => {
                write!(f, "\n  exception 0x{:02X}: {}", info.code.code(), info.description)?;
            }
            Payload::Empty => write!(f, "\n  (no decodable payload)")?,
        }
        Ok(())
    }
}

fn be_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
}

/// Unpacks `count` bits, first bit in bit 0 of the first byte.
pub fn unpack_bits(packed: &[u8], count: usize) -> Vec<bool> {
    (0..count.min(packed.len() * 8))
        .map(|index| packed[index / 8] & (1 << (index % 8)) != 0)
        .collect()
}

/// Data bytes following a byte count field, clamped to what was received.
fn counted_data(body: &[u8], count_offset: usize) -> &[u8] {
    let Some(&declared) = body.get(count_offset) else {
        return &[];
    };
    let data = &body[count_offset + 1..];
    if data.len() != usize::from(declared) {
        warn!(
            "Byte count {declared} does not match {} received data byte(s)",
            data.len()
        );
    }
    &data[..data.len().min(usize::from(declared))]
}

fn registers_of(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

fn coil_state(value: u16) -> bool {
    if value != COIL_ON && value != COIL_OFF {
        warn!("Unexpected coil value 0x{value:04X}");
    }
    value == COIL_ON
}

/// Address and value of a single write, shared by requests and echoes.
fn single_write(function: FunctionCode, body: &[u8]) -> Option<Payload> {
    let address = be_u16(body, 0)?;
    let value = be_u16(body, 2)?;
    Some(match function {
        FunctionCode::WriteSingleCoil => Payload::SingleCoil {
            address,
            value: coil_state(value),
        },
        _ => Payload::SingleRegister { address, value },
    })
}

fn response_payload(
    function: FunctionCode,
    body: &[u8],
    tracker: &PendingRequests,
) -> Option<Payload> {
    match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            let data = counted_data(body, 0);
            let available = data.len() * 8;
            let count = tracker
                .last_quantity(function)
                .map(|quantity| usize::from(quantity).min(available))
                .unwrap_or(available);
            Some(Payload::Bits(unpack_bits(data, count)))
        }
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            Some(Payload::Registers(registers_of(counted_data(body, 0))))
        }
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
            single_write(function, body)
        }
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
            Some(Payload::WriteConfirmation {
                address: be_u16(body, 0)?,
                quantity: be_u16(body, 2)?,
            })
        }
    }
}

fn request_payload(function: FunctionCode, body: &[u8]) -> Option<Payload> {
    match function {
        FunctionCode::ReadCoils
        | FunctionCode::ReadDiscreteInputs
        | FunctionCode::ReadHoldingRegisters
        | FunctionCode::ReadInputRegisters => Some(Payload::ReadRequest {
            address: be_u16(body, 0)?,
            quantity: be_u16(body, 2)?,
        }),
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
            single_write(function, body)
        }
        FunctionCode::WriteMultipleCoils => {
            let address = be_u16(body, 0)?;
            let quantity = be_u16(body, 2)?;
            let values = unpack_bits(counted_data(body, 4), usize::from(quantity));
            Some(Payload::WriteCoils { address, values })
        }
        FunctionCode::WriteMultipleRegisters => {
            let address = be_u16(body, 0)?;
            let mut values = registers_of(counted_data(body, 4));
            values.truncate(usize::from(be_u16(body, 2)?));
            Some(Payload::WriteRegisters { address, values })
        }
    }
}

fn payload_address(payload: &Payload) -> Option<u16> {
    match payload {
        Payload::SingleCoil { address, .. }
        | Payload::SingleRegister { address, .. }
        | Payload::WriteConfirmation { address, .. }
        | Payload::ReadRequest { address, .. }
        | Payload::WriteCoils { address, .. }
        | Payload::WriteRegisters { address, .. } => Some(*address),
        Payload::Bits(_) | Payload::Registers(_) | Payload::Exception(_) | Payload::Empty => None,
    }
}

/// Decodes one complete frame.
///
/// `tracker` is only read: bit read responses take their meaningful bit
/// count from the last request of the same function code (all received bits
/// when nothing was recorded), and read responses take their start address
/// from it.
pub fn decode(
    bytes: &[u8],
    direction: Direction,
    tracker: &PendingRequests,
) -> Result<DecodedResponse> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(MalformedFrame::TooShort(bytes.len()).into());
    }

    let slave_id = bytes[0];
    let raw_function = bytes[1];
    let body = &bytes[2..bytes.len() - 2];
    let crc_valid = crc::check_crc(bytes);
    if !crc_valid {
        debug!("CRC mismatch in {direction} frame {}", format::to_hex(bytes));
    }

    if raw_function & EXCEPTION_BIT != 0 {
        let function_code = raw_function & !EXCEPTION_BIT;
        let code = ExceptionCode::from(body[0]);
        trace!("Exception {code} for function 0x{function_code:02X} from slave {slave_id}");
        return Ok(DecodedResponse {
            slave_id,
            function_code,
            function_name: format!("Exception: {}", FunctionCode::name_of(function_code)),
            payload: Payload::Exception(ExceptionInfo {
                code,
                description: code.description(),
            }),
            start_address: None,
            crc_valid,
            is_exception: true,
            raw_frame: bytes.to_vec(),
            direction,
        });
    }

    let (function_name, payload, start_address) = match FunctionCode::try_from(raw_function) {
        Ok(function) => {
            let payload = match direction {
                Direction::Response => response_payload(function, body, tracker),
                Direction::Request => request_payload(function, body),
            }
            .unwrap_or_else(|| {
                warn!(
                    "{direction} frame too short for {function}: {}",
                    format::to_hex(bytes)
                );
                Payload::Empty
            });
            let start_address = match &payload {
                Payload::Bits(_) | Payload::Registers(_) => tracker
                    .last_request(function)
                    .and_then(|pending| pending.start_address),
                other => payload_address(other),
            };
            (function.name().to_string(), payload, start_address)
        }
        Err(_) => {
            debug!("Unknown function code 0x{raw_function:02X} from slave {slave_id}");
            ("Unknown Function".to_string(), Payload::Empty, None)
        }
    };

    Ok(DecodedResponse {
        slave_id,
        function_code: raw_function,
        function_name,
        payload,
        start_address,
        crc_valid,
        is_exception: false,
        raw_frame: bytes.to_vec(),
        direction,
    })
}

/// Decodes a frame typed as hex text, e.g. `"01 03 02 00 2A 38 5B"`.
pub fn decode_str(
    text: &str,
    direction: Direction,
    tracker: &PendingRequests,
) -> Result<DecodedResponse> {
    let bytes = format::parse_bytes(text, InputFormat::Hex)?;
    decode(&bytes, direction, tracker)
}
