//! Bounded, order preserving record of the traffic of a session.

use crate::format;
use crate::protocol::Direction;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Capacity used by [`SessionLog::default`].
pub const DEFAULT_CAPACITY: usize = 1000;

/// What was logged: raw frame bytes or a free text note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogContent {
    Frame(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLogEntry {
    pub timestamp: DateTime<Local>,
    pub direction: Direction,
    pub content: LogContent,
    /// Quantity the tracker held for the frame's function code when it was sent.
    pub associated_quantity: Option<u16>,
}

impl SessionLogEntry {
    pub fn frame(direction: Direction, bytes: Vec<u8>, associated_quantity: Option<u16>) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            content: LogContent::Frame(bytes),
            associated_quantity,
        }
    }

    pub fn text(direction: Direction, text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            content: LogContent::Text(text.into()),
            associated_quantity: None,
        }
    }

    pub fn frame_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            LogContent::Frame(bytes) => Some(bytes.as_slice()),
            LogContent::Text(_) => None,
        }
    }
}

impl fmt::Display for SessionLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: ",
            self.timestamp.format("%H:%M:%S"),
            self.direction
        )?;
        match &self.content {
            LogContent::Frame(bytes) => write!(f, "{}", format::to_hex(bytes)),
            LogContent::Text(text) => write!(f, "{text}"),
        }
    }
}

#[derive(Debug)]
struct Ring {
    entries: VecDeque<SessionLogEntry>,
    capacity: usize,
}

impl Ring {
    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// Append-only log holding at most `capacity` entries, oldest evicted first.
///
/// Clones share the same entries, so a reader task can append while another
/// task renders.
#[derive(Debug, Clone)]
pub struct SessionLog {
    ring: Arc<Mutex<Ring>>,
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SessionLog {
    /// Creates a log. A capacity below one is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Arc::new(Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                capacity,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, entry: SessionLogEntry) {
        let mut ring = self.lock();
        ring.entries.push_back(entry);
        ring.evict_overflow();
    }

    /// Snapshot of all entries, oldest first.
    pub fn entries(&self) -> Vec<SessionLogEntry> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Changes the capacity, evicting the oldest entries that no longer fit.
    pub fn set_capacity(&self, capacity: usize) {
        let mut ring = self.lock();
        ring.capacity = capacity.max(1);
        ring.evict_overflow();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn text_entries(log: &SessionLog) -> Vec<String> {
        log.entries()
            .into_iter()
            .map(|entry| match entry.content {
                LogContent::Text(text) => text,
                LogContent::Frame(bytes) => format::to_hex(&bytes),
            })
            .collect()
    }

    #[test]
    fn keeps_insertion_order() {
        let log = SessionLog::new(10);
        log.append(SessionLogEntry::text(Direction::Request, "first"));
        log.append(SessionLogEntry::frame(
            Direction::Response,
            vec![0x01, 0x83],
            None,
        ));
        assert_eq!(text_entries(&log), vec!["first", "01 83"]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let log = SessionLog::new(3);
        for index in 0..5 {
            log.append(SessionLogEntry::text(Direction::Response, index.to_string()));
        }
        assert_eq!(text_entries(&log), vec!["2", "3", "4"]);

        log.set_capacity(2);
        assert_eq!(text_entries(&log), vec!["3", "4"]);
        assert_eq!(log.capacity(), 2);
    }

    #[test]
    fn zero_capacity_keeps_latest_entry() {
        let log = SessionLog::new(0);
        assert_eq!(log.capacity(), 1);
        log.append(SessionLogEntry::text(Direction::Request, "a"));
        log.append(SessionLogEntry::text(Direction::Request, "b"));
        assert_eq!(text_entries(&log), vec!["b"]);
    }

    #[test]
    fn clear_empties_all_clones() {
        let log = SessionLog::default();
        let other = log.clone();
        log.append(SessionLogEntry::text(Direction::Request, "a"));
        assert_eq!(other.len(), 1);
        other.clear();
        assert!(log.is_empty());
        assert_eq!(log.capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn display_shows_time_direction_and_bytes() {
        let mut entry = SessionLogEntry::frame(Direction::Request, vec![0x01, 0x03], Some(10));
        entry.timestamp = Local.with_ymd_and_hms(2024, 3, 1, 13, 5, 9).unwrap();
        assert_eq!(entry.to_string(), "[13:05:09] TX: 01 03");
        assert_eq!(entry.frame_bytes(), Some(&[0x01, 0x03][..]));
        assert_eq!(entry.associated_quantity, Some(10));
    }
}
