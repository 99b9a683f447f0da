//! Modbus RTU protocol vocabulary: function codes, exception codes, slave
//! addressing and serial line settings.
//!
//! The types here are shared by the [`crate::encoder`], the
//! [`crate::decoder`] and the session layer. They carry no state.

use crate::error::InvalidRequest;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

/// Set on the function code byte of an exception response.
pub const EXCEPTION_BIT: u8 = 0x80;

/// Smallest frame the decoder accepts: slave id, function code, one payload
/// byte and the two CRC bytes.
pub const MIN_FRAME_LEN: usize = 5;

/// Coil value for "on" in single coil writes.
pub const COIL_ON: u16 = 0xFF00;
/// Coil value for "off" in single coil writes.
pub const COIL_OFF: u16 = 0x0000;

/// The function codes supported by the message engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub const ALL: [FunctionCode; 8] = [
        FunctionCode::ReadCoils,
        FunctionCode::ReadDiscreteInputs,
        FunctionCode::ReadHoldingRegisters,
        FunctionCode::ReadInputRegisters,
        FunctionCode::WriteSingleCoil,
        FunctionCode::WriteSingleRegister,
        FunctionCode::WriteMultipleCoils,
        FunctionCode::WriteMultipleRegisters,
    ];

    /// Human readable name, e.g. "Read Holding Registers".
    pub fn name(&self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    /// True for the functions whose read responses are bit packed.
    pub fn is_bit_read(&self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs
        )
    }

    /// Writes addressing coils rather than registers.
    pub fn is_coil_write(&self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteMultipleCoils
        )
    }

    /// Largest quantity a single request may carry.
    ///
    /// The limits keep every response inside one 256 byte RTU frame.
    pub fn max_quantity(&self) -> u16 {
        match self {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => 2000,
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => 125,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => 1,
            FunctionCode::WriteMultipleCoils => 1968,
            FunctionCode::WriteMultipleRegisters => 123,
        }
    }

    /// Name for a raw function code byte, falling back to "Unknown Function".
    pub fn name_of(code: u8) -> &'static str {
        FunctionCode::try_from(code)
            .map(|function| function.name())
            .unwrap_or("Unknown Function")
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = InvalidRequest;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FunctionCode::ReadCoils),
            0x02 => Ok(FunctionCode::ReadDiscreteInputs),
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x04 => Ok(FunctionCode::ReadInputRegisters),
            0x05 => Ok(FunctionCode::WriteSingleCoil),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            0x0F => Ok(FunctionCode::WriteMultipleCoils),
            0x10 => Ok(FunctionCode::WriteMultipleRegisters),
            other => Err(InvalidRequest::UnsupportedFunction(other)),
        }
    }
}

impl From<FunctionCode> for u8 {
    fn from(function: FunctionCode) -> u8 {
        function as u8
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Exception codes a slave reports in an exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetDeviceFailedToRespond,
    /// Any code outside the standard table, including the reserved 0x07 and 0x09.
    Unknown(u8),
}

impl ExceptionCode {
    pub fn code(&self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::SlaveDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::SlaveDeviceBusy => 0x06,
            ExceptionCode::MemoryParityError => 0x08,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetDeviceFailedToRespond => 0x0B,
            ExceptionCode::Unknown(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::SlaveDeviceFailure => "Slave Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::SlaveDeviceBusy => "Slave Device Busy",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetDeviceFailedToRespond => {
                "Gateway Target Device Failed to Respond"
            }
            ExceptionCode::Unknown(_) => "Unknown Exception",
        }
    }

    /// Name followed by an explanation of what the slave is reporting.
    pub fn description(&self) -> String {
        let detail = match self {
            ExceptionCode::IllegalFunction => {
                "The function code received in the query is not recognized or allowed by the slave"
            }
            ExceptionCode::IllegalDataAddress => {
                "The data address received in the query is not an allowed address for the slave"
            }
            ExceptionCode::IllegalDataValue => {
                "A value contained in the query data field is not an allowed value for the slave"
            }
            ExceptionCode::SlaveDeviceFailure => {
                "An unrecoverable error occurred while the slave was attempting to perform the requested action"
            }
            ExceptionCode::Acknowledge => {
                "The slave has accepted the request and is processing it, but a long duration of time will be required to do so"
            }
            ExceptionCode::SlaveDeviceBusy => {
                "The slave is engaged in processing a long-duration program command"
            }
            ExceptionCode::MemoryParityError => {
                "The slave attempted to read extended memory, but detected a parity error in the memory"
            }
            ExceptionCode::GatewayPathUnavailable => {
                "The gateway was unable to establish a connection path to the target device"
            }
            ExceptionCode::GatewayTargetDeviceFailedToRespond => {
                "No response was obtained from the target device"
            }
            ExceptionCode::Unknown(_) => return self.name().to_string(),
        };
        format!("{} ({detail})", self.name())
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::SlaveDeviceBusy,
            0x08 => ExceptionCode::MemoryParityError,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetDeviceFailedToRespond,
            other => ExceptionCode::Unknown(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

/// A unicast Modbus RTU slave address.
///
/// Valid addresses are 1 to 247. The broadcast address 0 is not supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlaveId(u8);

impl SlaveId {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;
}

impl Default for SlaveId {
    fn default() -> Self {
        Self(0x01)
    }
}

impl Deref for SlaveId {
    type Target = u8;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u8> for SlaveId {
    type Error = InvalidRequest;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidRequest::SlaveIdOutOfRange(value))
        }
    }
}

impl fmt::Display for SlaveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which way a frame travelled: out to the slave or back from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Transmitted by this master (TX).
    Request,
    /// Received from a slave (RX).
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "TX"),
            Direction::Response => write!(f, "RX"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown direction '{0}', expected tx or rx")]
pub struct ParseDirectionError(String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tx" | "request" => Ok(Direction::Request),
            "rx" | "response" => Ok(Direction::Response),
            _ => Err(ParseDirectionError(s.to_string())),
        }
    }
}

/// Serial line speeds offered for RTU sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u32", into = "u32"))]
pub enum BaudRate {
    B1200,
    B2400,
    B4800,
    #[default]
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
}

impl From<BaudRate> for u32 {
    fn from(baud_rate: BaudRate) -> u32 {
        match baud_rate {
            BaudRate::B1200 => 1200,
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported baud rate {0}")]
pub struct UnsupportedBaudRate(u32);

impl TryFrom<u32> for BaudRate {
    type Error = UnsupportedBaudRate;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1200 => Ok(BaudRate::B1200),
            2400 => Ok(BaudRate::B2400),
            4800 => Ok(BaudRate::B4800),
            9600 => Ok(BaudRate::B9600),
            19200 => Ok(BaudRate::B19200),
            38400 => Ok(BaudRate::B38400),
            57600 => Ok(BaudRate::B57600),
            115200 => Ok(BaudRate::B115200),
            other => Err(UnsupportedBaudRate(other)),
        }
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}
