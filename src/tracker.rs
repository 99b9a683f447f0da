//! Remembers the most recent request sent for each function code.
//!
//! Bit read responses do not say how many of their packed bits are
//! meaningful, so the decoder asks the tracker what was last requested for
//! that function code. There is no per-transaction correlation: the answer
//! is "what the last request of this kind asked for", and entries survive
//! reconnects until they are overwritten or explicitly cleared.

use crate::protocol::FunctionCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// What was asked for by the last request of one function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub quantity: u16,
    /// `None` when only the quantity of the request is known.
    pub start_address: Option<u16>,
}

/// Shared handle to the per-function-code request memory.
///
/// Cloning is cheap and every clone sees the same entries, so the sending
/// side and the reading side of a session can each hold one.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    entries: Arc<Mutex<HashMap<FunctionCode, PendingRequest>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FunctionCode, PendingRequest>> {
        // The map holds plain values, a panicking writer cannot leave it inconsistent.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the quantity of a request whose start address is unknown.
    pub fn record_request(&self, function: FunctionCode, quantity: u16) {
        self.lock().insert(
            function,
            PendingRequest {
                quantity,
                start_address: None,
            },
        );
    }

    /// Records quantity and start address of a request.
    pub fn record(&self, function: FunctionCode, quantity: u16, start_address: u16) {
        self.lock().insert(
            function,
            PendingRequest {
                quantity,
                start_address: Some(start_address),
            },
        );
    }

    pub fn last_quantity(&self, function: FunctionCode) -> Option<u16> {
        self.last_request(function).map(|pending| pending.quantity)
    }

    pub fn last_request(&self, function: FunctionCode) -> Option<PendingRequest> {
        self.lock().get(&function).copied()
    }

    /// Forgets every recorded request.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_until_recorded() {
        let tracker = PendingRequests::new();
        assert_eq!(tracker.last_quantity(FunctionCode::ReadCoils), None);
        tracker.record_request(FunctionCode::ReadCoils, 5);
        assert_eq!(tracker.last_quantity(FunctionCode::ReadCoils), Some(5));
        assert_eq!(tracker.last_quantity(FunctionCode::ReadDiscreteInputs), None);
    }

    #[test]
    fn latest_request_wins() {
        let tracker = PendingRequests::new();
        tracker.record(FunctionCode::ReadCoils, 5, 0x0010);
        tracker.record(FunctionCode::ReadCoils, 12, 0x0020);
        assert_eq!(
            tracker.last_request(FunctionCode::ReadCoils),
            Some(PendingRequest {
                quantity: 12,
                start_address: Some(0x0020)
            })
        );
        tracker.record_request(FunctionCode::ReadCoils, 3);
        assert_eq!(
            tracker.last_request(FunctionCode::ReadCoils),
            Some(PendingRequest {
                quantity: 3,
                start_address: None
            })
        );
    }

    #[test]
    fn clones_share_entries() {
        let tracker = PendingRequests::new();
        let reader_side = tracker.clone();
        let handle = std::thread::spawn(move || {
            tracker.record(FunctionCode::ReadDiscreteInputs, 9, 100);
        });
        handle.join().unwrap();
        assert_eq!(
            reader_side.last_quantity(FunctionCode::ReadDiscreteInputs),
            Some(9)
        );
        reader_side.clear();
        assert_eq!(
            reader_side.last_quantity(FunctionCode::ReadDiscreteInputs),
            None
        );
    }
}
