//! Named byte patterns searched in traffic, to spot values of interest while
//! monitoring a bus.
//!
//! A pattern is written `name=bytes`. The bytes are hex by default,
//! `dec:` selects decimal notation and `text:` takes the UTF-8 bytes of the
//! rest literally:
//!
//! ```
//! use mbterm_lib::highlight::HighlightPattern;
//!
//! let pattern: HighlightPattern = "holding=01 03".parse().unwrap();
//! assert_eq!(pattern.bytes(), &[0x01, 0x03]);
//! let matches = pattern.find_in(&[0x01, 0x03, 0x02, 0x01, 0x03]);
//! assert_eq!(matches, vec![0, 3]);
//! ```

use crate::error::MalformedFrame;
use crate::format::{self, InputFormat};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightPattern {
    name: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseHighlightError {
    #[error("expected name=bytes, got '{0}'")]
    MissingName(String),

    #[error("pattern '{0}' has no bytes")]
    Empty(String),

    #[error(transparent)]
    InvalidBytes(#[from] MalformedFrame),
}

impl HighlightPattern {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte offsets of every occurrence in `frame`, overlapping ones included.
    pub fn find_in(&self, frame: &[u8]) -> Vec<usize> {
        if self.bytes.is_empty() {
            return Vec::new();
        }
        frame
            .windows(self.bytes.len())
            .enumerate()
            .filter(|(_, window)| *window == self.bytes.as_slice())
            .map(|(offset, _)| offset)
            .collect()
    }
}

impl FromStr for HighlightPattern {
    type Err = ParseHighlightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, pattern) = s
            .split_once('=')
            .filter(|(name, _)| !name.trim().is_empty())
            .ok_or_else(|| ParseHighlightError::MissingName(s.to_string()))?;
        let bytes = if let Some(text) = pattern.strip_prefix("text:") {
            text.as_bytes().to_vec()
        } else if let Some(numbers) = pattern.strip_prefix("dec:") {
            format::parse_bytes(numbers, InputFormat::Decimal)?
        } else {
            format::parse_bytes(pattern, InputFormat::Hex)?
        };
        if bytes.is_empty() {
            return Err(ParseHighlightError::Empty(s.to_string()));
        }
        Ok(Self::new(name.trim(), bytes))
    }
}

impl fmt::Display for HighlightPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, format::to_hex(&self.bytes))
    }
}

/// One occurrence of a pattern in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightMatch<'a> {
    pub name: &'a str,
    /// First byte of the occurrence.
    pub start: usize,
    /// One past the last byte.
    pub end: usize,
}

/// All occurrences of all patterns, ordered by start offset.
pub fn find_matches<'a>(
    patterns: &'a [HighlightPattern],
    frame: &[u8],
) -> Vec<HighlightMatch<'a>> {
    let mut matches: Vec<_> = patterns
        .iter()
        .flat_map(|pattern| {
            pattern.find_in(frame).into_iter().map(|start| HighlightMatch {
                name: pattern.name(),
                start,
                end: start + pattern.bytes().len(),
            })
        })
        .collect();
    matches.sort_by_key(|found| found.start);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_each_notation() {
        let hex: HighlightPattern = "read=0x01 0x03".parse().unwrap();
        assert_eq!(hex, HighlightPattern::new("read", vec![0x01, 0x03]));
        let dec: HighlightPattern = "ten=dec:10,0".parse().unwrap();
        assert_eq!(dec.bytes(), &[10, 0]);
        let text: HighlightPattern = "ok=text:OK".parse().unwrap();
        assert_eq!(text.bytes(), b"OK");
        assert_eq!(text.to_string(), "ok=4F 4B");
    }

    #[test]
    fn rejects_bad_patterns() {
        assert_matches!(
            "0103".parse::<HighlightPattern>(),
            Err(ParseHighlightError::MissingName(_))
        );
        assert_matches!(
            "=01".parse::<HighlightPattern>(),
            Err(ParseHighlightError::MissingName(_))
        );
        assert_matches!(
            "none=".parse::<HighlightPattern>(),
            Err(ParseHighlightError::Empty(_))
        );
        assert_matches!(
            "bad=zz".parse::<HighlightPattern>(),
            Err(ParseHighlightError::InvalidBytes(MalformedFrame::InvalidOctet(_)))
        );
    }

    #[test]
    fn overlapping_occurrences_are_all_found() {
        let pattern = HighlightPattern::new("ff", vec![0xFF, 0xFF]);
        assert_eq!(pattern.find_in(&[0xFF, 0xFF, 0xFF, 0x00]), vec![0, 1]);
        assert!(pattern.find_in(&[0xFF]).is_empty());
    }

    #[test]
    fn matches_are_ordered_by_offset() {
        let patterns = [
            HighlightPattern::new("value", vec![0x00, 0x0A]),
            HighlightPattern::new("slave", vec![0x11]),
        ];
        let frame = [0x11, 0x03, 0x02, 0x00, 0x0A, 0x11];
        let found = find_matches(&patterns, &frame);
        assert_eq!(
            found,
            vec![
                HighlightMatch { name: "slave", start: 0, end: 1 },
                HighlightMatch { name: "value", start: 3, end: 5 },
                HighlightMatch { name: "slave", start: 5, end: 6 },
            ]
        );
    }
}
