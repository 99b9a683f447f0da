use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use mbterm_lib::encoder::RequestDescriptor;
use mbterm_lib::format::{DisplayFormat, InputFormat};
use mbterm_lib::highlight::HighlightPattern;
use mbterm_lib::protocol as proto;
use std::path::PathBuf;
use std::time::Duration;

fn parse_slave_id(s: &str) -> Result<proto::SlaveId, String> {
    let slave_id = clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid slave id format: {e}"))?;
    proto::SlaveId::try_from(slave_id).map_err(|e| e.to_string())
}

fn parse_baud_rate(s: &str) -> Result<proto::BaudRate, String> {
    let rate_val = s
        .parse::<u32>()
        .map_err(|e| format!("Invalid baud rate number format: {e}"))?;
    proto::BaudRate::try_from(rate_val).map_err(|e| e.to_string())
}

fn parse_direction(s: &str) -> Result<proto::Direction, String> {
    s.parse::<proto::Direction>().map_err(|e| e.to_string())
}

fn parse_display_format(s: &str) -> Result<DisplayFormat, String> {
    s.parse::<DisplayFormat>().map_err(|e| e.to_string())
}

fn parse_input_format(s: &str) -> Result<InputFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "hex" => Ok(InputFormat::Hex),
        "dec" | "decimal" => Ok(InputFormat::Decimal),
        _ => Err(format!("Unknown input format '{s}', expected hex or decimal")),
    }
}

fn parse_coil(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(format!("Invalid coil state '{s}', expected on/off or 1/0")),
    }
}

/// Slave and start address shared by all requests.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct Target {
    /// The Modbus slave id (1 to 247), decimal or hexadecimal.
    #[arg(short, long, default_value_t = proto::SlaveId::default(), value_parser = parse_slave_id)]
    pub slave: proto::SlaveId,

    /// Start address, decimal or hexadecimal (e.g. "0x0010").
    #[arg(short, long, default_value_t = 0, value_parser = clap_num::maybe_hex::<u16>)]
    pub address: u16,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ReadRange {
    #[command(flatten)]
    pub target: Target,

    /// Number of coils, inputs or registers to read.
    #[arg(short = 'n', long, default_value_t = 1, value_parser = clap_num::maybe_hex::<u16>)]
    pub quantity: u16,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliRequest {
    /// Read coils (0x01).
    ReadCoils(ReadRange),
    /// Read discrete inputs (0x02).
    ReadDiscreteInputs(ReadRange),
    /// Read holding registers (0x03).
    ReadHoldingRegisters(ReadRange),
    /// Read input registers (0x04).
    ReadInputRegisters(ReadRange),
    /// Write a single coil (0x05).
    WriteSingleCoil {
        #[command(flatten)]
        target: Target,
        /// New coil state: "on", "off", "1" or "0".
        #[arg(action = clap::ArgAction::Set, value_parser = parse_coil)]
        value: bool,
    },
    /// Write a single register (0x06).
    WriteSingleRegister {
        #[command(flatten)]
        target: Target,
        /// New register value, decimal or hexadecimal.
        #[arg(value_parser = clap_num::maybe_hex::<u16>)]
        value: u16,
    },
    /// Write multiple coils (0x0F).
    /// The quantity is the number of values given.
    #[clap(verbatim_doc_comment)]
    WriteMultipleCoils {
        #[command(flatten)]
        target: Target,
        /// Comma separated coil states, e.g. "on,off,1,0".
        #[arg(required = true, value_delimiter = ',', value_parser = parse_coil, verbatim_doc_comment)]
        values: Vec<bool>,
    },
    /// Write multiple registers (0x10).
    /// The quantity is the number of values given.
    #[clap(verbatim_doc_comment)]
    WriteMultipleRegisters {
        #[command(flatten)]
        target: Target,
        /// Comma separated register values, e.g. "10,0x20,300".
        #[arg(required = true, value_delimiter = ',', value_parser = clap_num::maybe_hex::<u16>, verbatim_doc_comment)]
        values: Vec<u16>,
    },
}

impl CliRequest {
    pub fn to_descriptor(&self) -> RequestDescriptor {
        match self {
            CliRequest::ReadCoils(range) => {
                RequestDescriptor::read_coils(*range.target.slave, range.target.address, range.quantity)
            }
            CliRequest::ReadDiscreteInputs(range) => RequestDescriptor::read_discrete_inputs(
                *range.target.slave,
                range.target.address,
                range.quantity,
            ),
            CliRequest::ReadHoldingRegisters(range) => RequestDescriptor::read_holding_registers(
                *range.target.slave,
                range.target.address,
                range.quantity,
            ),
            CliRequest::ReadInputRegisters(range) => RequestDescriptor::read_input_registers(
                *range.target.slave,
                range.target.address,
                range.quantity,
            ),
            CliRequest::WriteSingleCoil { target, value } => {
                RequestDescriptor::write_single_coil(*target.slave, target.address, *value)
            }
            CliRequest::WriteSingleRegister { target, value } => {
                RequestDescriptor::write_single_register(*target.slave, target.address, *value)
            }
            CliRequest::WriteMultipleCoils { target, values } => {
                RequestDescriptor::write_multiple_coils(*target.slave, target.address, values.clone())
            }
            CliRequest::WriteMultipleRegisters { target, values } => {
                RequestDescriptor::write_multiple_registers(
                    *target.slave,
                    target.address,
                    values.clone(),
                )
            }
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum RtuCommand {
    /// Send a request and print the response.
    /// Write requests ask for confirmation unless --yes is given.
    #[clap(verbatim_doc_comment)]
    Send {
        /// Repeat the request at this interval (e.g., "1s", "500ms") until
        /// --count requests were sent or Ctrl-C is pressed.
        #[arg(long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
        repeat: Option<Duration>,

        /// Number of requests to send, at least 1.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        count: Option<u32>,

        /// Do not ask before sending write requests.
        #[arg(short, long)]
        yes: bool,

        #[command(subcommand)]
        request: CliRequest,
    },
    /// Print every frame received on the bus.
    Monitor {
        /// Stop after this time (e.g., "30s"). Runs until Ctrl-C otherwise.
        #[arg(long, value_parser = humantime::parse_duration)]
        duration: Option<Duration>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// Compute the CRC16 of the given bytes and print the terminated frame.
    Crc {
        /// Notation of the bytes: hex or decimal.
        #[arg(long, default_value = "hex", value_parser = parse_input_format)]
        input: InputFormat,

        /// Bytes, e.g. "01 03 00 00 00 0A".
        #[arg(required = true)]
        bytes: Vec<String>,
    },
    /// Print the frame of a request without sending it.
    Encode {
        #[command(subcommand)]
        request: CliRequest,
    },
    /// Decode a single frame.
    Decode {
        /// Direction of the frame: "rx" for responses, "tx" for requests.
        /// Taken from a "TX:" or "RX:" prefix of the bytes when omitted,
        /// e.g. a line copied from the session log. Defaults to "rx".
        #[arg(long, value_parser = parse_direction, verbatim_doc_comment)]
        direction: Option<proto::Direction>,

        /// Quantity of the request that caused a coil or discrete input
        /// response. All received bits are shown when omitted.
        #[arg(long, value_parser = clap_num::maybe_hex::<u16>, verbatim_doc_comment)]
        function_quantity: Option<u16>,

        /// Start address of the request that caused a read response.
        #[arg(long, value_parser = clap_num::maybe_hex::<u16>)]
        start_address: Option<u16>,

        /// Notation of the bytes: hex or decimal.
        #[arg(long, default_value = "hex", value_parser = parse_input_format)]
        input: InputFormat,

        /// Frame bytes, e.g. "01 03 02 00 2A 38 5B".
        #[arg(required = true)]
        bytes: Vec<String>,
    },
    /// Talk to devices on a Modbus RTU (serial) bus.
    Rtu {
        /// Serial port device name.
        /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
        #[arg(short, long, verbatim_doc_comment)]
        device: Option<String>,

        /// Baud rate for serial communication.
        /// Supported values: 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200.
        #[arg(long, value_parser = parse_baud_rate, verbatim_doc_comment)]
        baud_rate: Option<proto::BaudRate>,

        /// YAML file with serial defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Reassemble frames split across serial reads.
        #[arg(long)]
        reassemble: bool,

        /// Report where a byte pattern occurs in received frames. Repeatable.
        /// Bytes are hex ("status=01 03"), decimal ("ten=dec:10") or text ("ok=text:OK").
        #[arg(long = "highlight", value_name = "NAME=BYTES", verbatim_doc_comment)]
        highlights: Vec<HighlightPattern>,

        #[command(subcommand)]
        command: RtuCommand,
    },
}

const fn about_text() -> &'static str {
    "Modbus RTU terminal - encode, decode and exchange Modbus RTU frames."
}

#[derive(Parser, Debug)]
#[command(name="mbterm", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is warnings only.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: CliCommand,

    /// How raw bytes are printed: hex, decimal, binary or ascii.
    #[arg(global = true, long, default_value = "hex", value_parser = parse_display_format)]
    pub format: DisplayFormat,

    /// Time to wait for a response.
    /// Defaults to 1s, or the value of the config file.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    /// Minimum delay between two requests.
    /// Raised to the 3.5 character silence of the baud rate when shorter.
    /// Examples: "50ms", "100ms".
    #[arg(global = true, long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub delay: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use mbterm_lib::encoder::RequestValues;
    use mbterm_lib::protocol::FunctionCode;

    #[test]
    fn command_definition_is_consistent() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_read_request_with_hex_numbers() {
        let args = CliArgs::try_parse_from([
            "mbterm",
            "encode",
            "read-holding-registers",
            "-s",
            "0x11",
            "-a",
            "0x006B",
            "-n",
            "3",
        ])
        .unwrap();
        let CliCommand::Encode { request } = args.command else {
            panic!("expected encode command");
        };
        let descriptor = request.to_descriptor();
        assert_eq!(descriptor.slave_id, 0x11);
        assert_eq!(descriptor.function, FunctionCode::ReadHoldingRegisters);
        assert_eq!(descriptor.start_address, 0x006B);
        assert_eq!(descriptor.quantity, 3);
    }

    #[test]
    fn parses_comma_separated_coils() {
        let args = CliArgs::try_parse_from([
            "mbterm",
            "rtu",
            "--baud-rate",
            "19200",
            "send",
            "--yes",
            "write-multiple-coils",
            "-a",
            "19",
            "on,0,1,off",
        ])
        .unwrap();
        let CliCommand::Rtu {
            baud_rate, command, ..
        } = args.command
        else {
            panic!("expected rtu command");
        };
        assert_eq!(baud_rate, Some(proto::BaudRate::B19200));
        let RtuCommand::Send { yes, request, .. } = command else {
            panic!("expected send command");
        };
        assert!(yes);
        let descriptor = request.to_descriptor();
        assert_eq!(descriptor.quantity, 4);
        assert_eq!(
            descriptor.values,
            RequestValues::Coils(vec![true, false, true, false])
        );
    }

    #[test]
    fn rejects_zero_count() {
        let parse = |count: &'static str| {
            CliArgs::try_parse_from(["mbterm", "rtu", "send", "--count", count, "read-coils"])
        };
        assert!(parse("0").is_err());
        let args = parse("2").unwrap();
        assert_matches::assert_matches!(
            args.command,
            CliCommand::Rtu {
                command: RtuCommand::Send { count: Some(2), .. },
                ..
            }
        );
    }

    #[test]
    fn collects_highlight_patterns() {
        let args = CliArgs::try_parse_from([
            "mbterm",
            "rtu",
            "--highlight",
            "slave=11",
            "--highlight",
            "ok=text:OK",
            "monitor",
        ])
        .unwrap();
        let CliCommand::Rtu { highlights, .. } = args.command else {
            panic!("expected rtu command");
        };
        assert_eq!(
            highlights,
            vec![
                HighlightPattern::new("slave", vec![0x11]),
                HighlightPattern::new("ok", b"OK".to_vec()),
            ]
        );
        assert!(CliArgs::try_parse_from(["mbterm", "rtu", "--highlight", "11", "monitor"]).is_err());
    }

    #[test]
    fn rejects_out_of_range_slave() {
        assert!(CliArgs::try_parse_from(["mbterm", "encode", "read-coils", "-s", "248"]).is_err());
    }

    #[test]
    fn decode_accepts_direction_and_quantity() {
        let args = CliArgs::try_parse_from([
            "mbterm",
            "--format",
            "binary",
            "decode",
            "--direction",
            "tx",
            "--function-quantity",
            "10",
            "01 01 00 00 00 0A",
        ])
        .unwrap();
        assert_eq!(args.format, DisplayFormat::Binary);
        assert_matches::assert_matches!(
            args.command,
            CliCommand::Decode {
                direction: Some(proto::Direction::Request),
                function_quantity: Some(10),
                start_address: None,
                ..
            }
        );
    }
}
