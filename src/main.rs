//! Modbus RTU terminal
//!
//! A command-line interface (CLI) application for building, inspecting and
//! exchanging Modbus RTU frames.
//!
//! This tool allows users to:
//! - Compute the CRC16 of arbitrary bytes.
//! - Print the frame of a request without sending it.
//! - Decode a single request or response frame.
//! - Send requests over a serial port, once or repeatedly, and print the
//!   decoded responses.
//! - Monitor a serial bus and decode every received frame.
//!
//! The CLI leverages the `mbterm_lib` crate for the message engine and the
//! serial session.

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use mbterm_lib::{
    crc, decoder, encoder,
    format::{self, DisplayFormat, InputFormat},
    highlight::{self, HighlightPattern},
    protocol as proto,
    session_log::SessionLog,
    tokio_common::{self, minimum_rtu_delay},
    tokio_session::{ReadMode, Session, SessionOptions},
    tracker::PendingRequests,
};
use std::{panic, path::Path, time::Duration};
use tokio_serial::SerialPortBuilderExt;

mod commandline;
mod config;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0));

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Checks if the user-provided RTU delay is sufficient; if not, uses the calculated minimum.
fn check_rtu_delay(user_delay: Duration, baud_rate: &proto::BaudRate) -> Duration {
    let min_rtu_delay = minimum_rtu_delay(baud_rate);
    if user_delay < min_rtu_delay {
        warn!(
            "User-defined RTU delay of {user_delay:?} is below the recommended minimum of {min_rtu_delay:?} for {baud_rate} baud. Using minimum."
        );
        min_rtu_delay
    } else {
        user_delay
    }
}

fn parse_cli_bytes(bytes: &[String], input: InputFormat) -> Result<Vec<u8>> {
    let text = bytes.join(" ");
    format::parse_bytes(&text, input).with_context(|| format!("Cannot parse bytes '{text}'"))
}

fn print_response(response: &decoder::DecodedResponse, display: DisplayFormat) {
    println!("{response}");
    if display != DisplayFormat::Hex {
        println!("  raw: {}", display.format_bytes(&response.raw_frame));
    }
}

fn highlight_lines(frame: &[u8], patterns: &[HighlightPattern]) -> Vec<String> {
    highlight::find_matches(patterns, frame)
        .into_iter()
        .map(|found| {
            format!(
                "  match {} at byte {}: {}",
                found.name,
                found.start,
                format::to_hex(&frame[found.start..found.end])
            )
        })
        .collect()
}

fn print_highlights(response: &decoder::DecodedResponse, patterns: &[HighlightPattern]) {
    for line in highlight_lines(&response.raw_frame, patterns) {
        println!("{line}");
    }
}

fn handle_crc(bytes: &[String], input: InputFormat, display: DisplayFormat) -> Result<()> {
    let data = parse_cli_bytes(bytes, input)?;
    let crc = crc::crc16(&data);
    println!(
        "CRC16: 0x{crc:04X} (on the wire: {})",
        display.format_bytes(&crc::crc16_bytes(&data))
    );
    let frame = encoder::Frame::with_crc(data);
    println!("Frame: {}", display.format_bytes(&frame));
    Ok(())
}

fn handle_encode(request: &commandline::CliRequest, display: DisplayFormat) -> Result<()> {
    let descriptor = request.to_descriptor();
    info!("Encoding {descriptor:?}");
    let frame = encoder::encode(&descriptor).context("Cannot encode request")?;
    println!("{}", display.format_bytes(&frame));
    Ok(())
}

/// Decodes bytes typed on the command line.
///
/// A leading `TX:` or `RX:`, as printed in the session log, selects the
/// direction unless `direction` is given.
fn decode_cli_frame(
    direction: Option<proto::Direction>,
    function_quantity: Option<u16>,
    start_address: Option<u16>,
    bytes: &[String],
    input: InputFormat,
) -> Result<decoder::DecodedResponse> {
    let line = bytes.join(" ");
    let (prefix, text) = format::split_direction_prefix(&line);
    let direction = match (direction, prefix) {
        (Some(direction), Some(prefix)) if direction != prefix => {
            debug!("--direction {direction} overrides the {prefix} prefix");
            direction
        }
        (Some(direction), _) | (None, Some(direction)) => direction,
        (None, None) => proto::Direction::Response,
    };
    let data = format::parse_bytes(text, input)
        .with_context(|| format!("Cannot parse bytes '{text}'"))?;
    let tracker = PendingRequests::new();
    if let Some(quantity) = function_quantity {
        let function = data
            .get(1)
            .map(|code| code & !proto::EXCEPTION_BIT)
            .and_then(|code| proto::FunctionCode::try_from(code).ok());
        match function {
            Some(function) => tracker.record_request(function, quantity),
            None => warn!("Ignoring --function-quantity, the frame has no supported function code"),
        }
    }
    let response = decoder::decode(&data, direction, &tracker).context("Cannot decode frame")?;
    Ok(match start_address {
        Some(start_address) => response.with_start_address(start_address),
        None => response,
    })
}

fn handle_decode(
    direction: Option<proto::Direction>,
    function_quantity: Option<u16>,
    start_address: Option<u16>,
    bytes: &[String],
    input: InputFormat,
    display: DisplayFormat,
) -> Result<()> {
    let response = decode_cli_frame(direction, function_quantity, start_address, bytes, input)?;
    print_response(&response, display);
    Ok(())
}

/// Asks before a write request goes out.
fn confirm_write(descriptor: &encoder::RequestDescriptor) -> Result<bool> {
    println!(
        "WARNING: {} changes the state of slave {} starting at address {}.",
        descriptor.function, descriptor.slave_id, descriptor.start_address
    );
    Confirm::new()
        .with_prompt("Do you want to send this request?")
        .default(false)
        .show_default(true)
        .interact()
        .context("Failed to get user confirmation.")
}

/// Serial settings after merging command line and config file.
#[derive(Debug)]
struct RtuSettings {
    device: String,
    baud_rate: proto::BaudRate,
    timeout: Duration,
    delay: Duration,
    read_mode: ReadMode,
    log_capacity: usize,
}

fn resolve_rtu_settings(
    args: &commandline::CliArgs,
    device: &Option<String>,
    baud_rate: &Option<proto::BaudRate>,
    config_file: Option<&Path>,
    reassemble: bool,
) -> Result<RtuSettings> {
    let config = match config_file {
        Some(path) => config::load_config(path)?.serial,
        None => config::SerialConfig::default(),
    };
    let baud_rate = baud_rate.unwrap_or(config.baud_rate);
    Ok(RtuSettings {
        device: device.clone().unwrap_or(config.device),
        baud_rate,
        timeout: args.timeout.unwrap_or(config.timeout),
        delay: check_rtu_delay(args.delay.unwrap_or(config.delay), &baud_rate),
        read_mode: if reassemble || config.reassemble {
            ReadMode::Reassemble
        } else {
            ReadMode::PerChunk
        },
        log_capacity: config.log_capacity,
    })
}

async fn run_send<T>(
    session: &mut Session<T>,
    descriptor: &encoder::RequestDescriptor,
    settings: &RtuSettings,
    repeat: Option<Duration>,
    count: Option<u32>,
    display: DisplayFormat,
    highlights: &[HighlightPattern],
) -> Result<()>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let limit = count.or(if repeat.is_none() { Some(1) } else { None });
    let interval = repeat.unwrap_or(settings.delay).max(settings.delay);
    let mut sent = 0u32;
    loop {
        match session.request(descriptor, settings.timeout).await {
            Ok(response) => {
                print_response(&response, display);
                print_highlights(&response, highlights);
            }
            Err(tokio_common::Error::Timeout(timeout)) => {
                println!("No response within {timeout:?}");
            }
            Err(tokio_common::Error::Engine(mbterm_lib::Error::MalformedFrame(error))) => {
                println!("Malformed response: {error}");
            }
            Err(error) => return Err(error).context("Request failed"),
        }
        sent += 1;
        if limit.is_some_and(|limit| sent >= limit) {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted after {sent} request(s)");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
    Ok(())
}

async fn run_monitor<T>(
    session: &mut Session<T>,
    duration: Option<Duration>,
    display: DisplayFormat,
    highlights: &[HighlightPattern],
) -> Result<()>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            next = session.next_response() => next,
        };
        match next {
            Some(Ok(response)) => {
                print_response(&response, display);
                print_highlights(&response, highlights);
            }
            Some(Err(tokio_common::Error::Engine(error))) => println!("Malformed frame: {error}"),
            Some(Err(error)) => return Err(error).context("Monitoring failed"),
            None => {
                info!("Serial port closed");
                break;
            }
        }
    }
    Ok(())
}

fn print_session_log(log: &SessionLog) {
    println!("\nSession log ({} entries):", log.len());
    for entry in log.entries() {
        println!("{entry}");
    }
}

fn handle_rtu(
    args: &commandline::CliArgs,
    settings: RtuSettings,
    highlights: &[HighlightPattern],
    command: &commandline::RtuCommand,
) -> Result<()> {
    if let commandline::RtuCommand::Send {
        yes: false,
        request,
        ..
    } = command
    {
        let descriptor = request.to_descriptor();
        if descriptor.function.is_write() && !confirm_write(&descriptor)? {
            info!("Write request aborted by user.");
            return Ok(());
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Cannot start async runtime")?;

    runtime.block_on(async {
        info!(
            "Opening serial port {} at {} baud...",
            settings.device, settings.baud_rate
        );
        let port = tokio_common::serial_port_builder(&settings.device, &settings.baud_rate)
            .open_native_async()
            .with_context(|| {
                format!(
                    "Cannot open serial port {} at {} baud",
                    settings.device, settings.baud_rate
                )
            })?;
        let log = SessionLog::new(settings.log_capacity);
        let options = SessionOptions::for_baud_rate(settings.read_mode, &settings.baud_rate);
        let mut session = Session::start(port, options, PendingRequests::new(), log.clone());

        let result = match command {
            commandline::RtuCommand::Send {
                repeat,
                count,
                request,
                ..
            } => {
                let descriptor = request.to_descriptor();
                run_send(
                    &mut session,
                    &descriptor,
                    &settings,
                    *repeat,
                    *count,
                    args.format,
                    highlights,
                )
                .await
            }
            commandline::RtuCommand::Monitor { duration } => {
                run_monitor(&mut session, *duration, args.format, highlights).await
            }
        };

        if let Err(error) = session.close().await {
            warn!("Cannot close session cleanly: {error}");
        }
        print_session_log(&log);
        result
    })
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    // 1. Initialize logging as early as possible
    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "mbterm started. Log level: {}",
        args.verbose.log_level_filter()
    );

    // 2. Execute the command
    match &args.command {
        commandline::CliCommand::Crc { input, bytes } => handle_crc(bytes, *input, args.format),
        commandline::CliCommand::Encode { request } => handle_encode(request, args.format),
        commandline::CliCommand::Decode {
            direction,
            function_quantity,
            start_address,
            input,
            bytes,
        } => handle_decode(
            *direction,
            *function_quantity,
            *start_address,
            bytes,
            *input,
            args.format,
        ),
        commandline::CliCommand::Rtu {
            device,
            baud_rate,
            config,
            reassemble,
            highlights,
            command,
        } => {
            // 3. Serial settings: command line over config file over defaults
            let settings =
                resolve_rtu_settings(&args, device, baud_rate, config.as_deref(), *reassemble)?;
            debug!("Serial settings: {settings:?}");
            handle_rtu(&args, settings, highlights, command)
        }
    }
}
