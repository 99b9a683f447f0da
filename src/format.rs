//! Text renderings of raw bytes, and parsing of user typed byte strings.

use crate::error::MalformedFrame;
use crate::protocol::Direction;
use std::fmt::Write;
use std::str::FromStr;

/// How raw bytes are shown in a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DisplayFormat {
    #[default]
    Hex,
    Decimal,
    Binary,
    Ascii,
}

impl DisplayFormat {
    pub fn format_bytes(&self, bytes: &[u8]) -> String {
        match self {
            DisplayFormat::Hex => to_hex(bytes),
            DisplayFormat::Decimal => join(bytes, |out, byte| write!(out, "{byte:>3}")),
            DisplayFormat::Binary => join(bytes, |out, byte| write!(out, "{byte:08b}")),
            DisplayFormat::Ascii => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown display format '{0}', expected hex, decimal, binary or ascii")]
pub struct ParseDisplayFormatError(String);

impl FromStr for DisplayFormat {
    type Err = ParseDisplayFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(DisplayFormat::Hex),
            "dec" | "decimal" => Ok(DisplayFormat::Decimal),
            "bin" | "binary" => Ok(DisplayFormat::Binary),
            "ascii" | "text" => Ok(DisplayFormat::Ascii),
            _ => Err(ParseDisplayFormatError(s.to_string())),
        }
    }
}

fn join<F>(bytes: &[u8], mut write_byte: F) -> String
where
    F: FnMut(&mut String, u8) -> std::fmt::Result,
{
    let mut out = String::with_capacity(bytes.len() * 9);
    for (index, byte) in bytes.iter().enumerate() {
        if index > 0 {
            out.push(' ');
        }
        // Writing into a String cannot fail.
        let _ = write_byte(&mut out, *byte);
    }
    out
}

/// Upper case hex octets separated by single spaces: `01 03 00 0A`.
pub fn to_hex(bytes: &[u8]) -> String {
    join(bytes, |out, byte| write!(out, "{byte:02X}"))
}

/// Notation of user supplied byte strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    /// `01 03 00 0A`, `0x01 0x03` or `0103000A`.
    #[default]
    Hex,
    /// Numbers 0-255 separated by spaces, commas or semicolons.
    Decimal,
}

/// Parses a typed byte string.
///
/// # Examples
///
/// ```
/// use mbterm_lib::format::{parse_bytes, InputFormat};
///
/// assert_eq!(parse_bytes("0x01 0x83 02", InputFormat::Hex).unwrap(), vec![1, 0x83, 2]);
/// assert_eq!(parse_bytes("1, 131; 2", InputFormat::Decimal).unwrap(), vec![1, 0x83, 2]);
/// ```
pub fn parse_bytes(text: &str, format: InputFormat) -> Result<Vec<u8>, MalformedFrame> {
    match format {
        InputFormat::Hex => parse_hex(text),
        InputFormat::Decimal => text
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';')
            .filter(|token| !token.is_empty())
            .map(|token| {
                token
                    .parse::<u8>()
                    .map_err(|_| MalformedFrame::InvalidOctet(token.to_string()))
            })
            .collect(),
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>, MalformedFrame> {
    let mut bytes = Vec::new();
    for token in text.split_whitespace() {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.is_empty()
            || digits.len() % 2 != 0
            || !digits.bytes().all(|c| c.is_ascii_hexdigit())
        {
            return Err(MalformedFrame::InvalidOctet(token.to_string()));
        }
        for pair in digits.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(pair)
                .map_err(|_| MalformedFrame::InvalidOctet(token.to_string()))?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|_| MalformedFrame::InvalidOctet(token.to_string()))?;
            bytes.push(byte);
        }
    }
    Ok(bytes)
}

/// Splits a `TX: ...` / `RX: ...` log line into direction and remainder.
///
/// A leading `[HH:MM:SS]` timestamp, as printed by the session log, is skipped.
pub fn split_direction_prefix(line: &str) -> (Option<Direction>, &str) {
    let mut trimmed = line.trim_start();
    if let Some((_, rest)) = trimmed
        .strip_prefix('[')
        .and_then(|stamped| stamped.split_once(']'))
    {
        trimmed = rest.trim_start();
    }
    for (prefix, direction) in [("TX:", Direction::Request), ("RX:", Direction::Response)] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return (Some(direction), rest.trim());
        }
    }
    (None, trimmed.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn renders_every_format() {
        let bytes = [0x01, 0x41, 0xFF];
        assert_eq!(DisplayFormat::Hex.format_bytes(&bytes), "01 41 FF");
        assert_eq!(DisplayFormat::Decimal.format_bytes(&bytes), "  1  65 255");
        assert_eq!(
            DisplayFormat::Binary.format_bytes(&bytes),
            "00000001 01000001 11111111"
        );
        assert_eq!(DisplayFormat::Ascii.format_bytes(b"OK"), "OK");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn display_format_from_str() {
        assert_eq!("HEX".parse::<DisplayFormat>(), Ok(DisplayFormat::Hex));
        assert_eq!("dec".parse::<DisplayFormat>(), Ok(DisplayFormat::Decimal));
        assert!("octal".parse::<DisplayFormat>().is_err());
    }

    #[test]
    fn parses_hex_variants() {
        assert_eq!(
            parse_bytes("01 03 00 0a", InputFormat::Hex).unwrap(),
            vec![0x01, 0x03, 0x00, 0x0A]
        );
        assert_eq!(
            parse_bytes("0103000A", InputFormat::Hex).unwrap(),
            vec![0x01, 0x03, 0x00, 0x0A]
        );
        assert_eq!(
            parse_bytes("  0x01\t0XFF ", InputFormat::Hex).unwrap(),
            vec![0x01, 0xFF]
        );
        assert_eq!(parse_bytes("", InputFormat::Hex).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_non_octets() {
        assert_matches!(
            parse_bytes("01 0G", InputFormat::Hex),
            Err(MalformedFrame::InvalidOctet(token)) if token == "0G"
        );
        assert_matches!(
            parse_bytes("01 123", InputFormat::Hex),
            Err(MalformedFrame::InvalidOctet(_))
        );
        assert_matches!(
            parse_bytes("0x", InputFormat::Hex),
            Err(MalformedFrame::InvalidOctet(_))
        );
        assert_matches!(
            parse_bytes("1 256", InputFormat::Decimal),
            Err(MalformedFrame::InvalidOctet(token)) if token == "256"
        );
    }

    #[test]
    fn direction_prefix() {
        assert_eq!(
            split_direction_prefix("TX: 01 03"),
            (Some(Direction::Request), "01 03")
        );
        assert_eq!(
            split_direction_prefix("RX:01 83 02"),
            (Some(Direction::Response), "01 83 02")
        );
        assert_eq!(split_direction_prefix("01 03 "), (None, "01 03"));
        assert_eq!(
            split_direction_prefix("[13:05:09] TX: 01 03 00 00"),
            (Some(Direction::Request), "01 03 00 00")
        );
    }
}
