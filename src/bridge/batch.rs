//! # Variable Batch Controller
//!
//! Resolves a batch of up to 16 variable hashes against the ECU, one request
//! at a time, and produces a single notification once every hash has been
//! answered.
//!
//! ## States
//!
//! | State | Condition | Leaves on |
//! |-------|-----------|-----------|
//! | Idle | no hashes pending | request write with at least one complete hash |
//! | Requesting | `cursor < count` | last response (→ Idle) or new request write (→ Requesting, preempted) |
//!
//! The controller performs no I/O. [`VariableBatchController::start`] and
//! [`VariableBatchController::accept`] tell the caller which request to send
//! next and when a notification is ready.
//!
//! There is no response timeout: an ECU that never answers keeps the batch in
//! Requesting until the peer writes a new request.

use crate::can::decoder::{decode_variable_hashes, response_entry};
use crate::can::encoder::encode_batch_notification;
use crate::can::protocol::{CanFrame, VariableHash, MAX_BATCH_VARS, VAR_RESPONSE_SIZE};

/// What the caller must do after feeding a frame to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStep {
    /// Not a variable response, or no batch in flight. Nothing changed.
    Ignored,
    /// Response stored; request this hash next
    Request(VariableHash),
    /// Batch finished; this is the consolidated notification payload
    Complete(Vec<u8>),
}

/// Batched variable request state machine
#[derive(Debug, Clone)]
pub struct VariableBatchController {
    response_id: u32,
    hashes: Vec<VariableHash>,
    cursor: usize,
    responses: Vec<[u8; VAR_RESPONSE_SIZE]>,
}

impl VariableBatchController {
    /// Create an idle controller matching responses on `response_id`
    pub fn new(response_id: u32) -> Self {
        Self {
            response_id,
            hashes: Vec::with_capacity(MAX_BATCH_VARS),
            cursor: 0,
            responses: Vec::with_capacity(MAX_BATCH_VARS),
        }
    }

    /// Start a batch from a variable request write
    ///
    /// Any batch in flight is discarded along with its collected responses.
    /// Returns the first hash to request, or `None` (state untouched) when the
    /// write holds no complete 4-byte hash.
    pub fn start(&mut self, payload: &[u8]) -> Option<VariableHash> {
        let hashes = decode_variable_hashes(payload);
        let first = *hashes.first()?;

        self.hashes = hashes;
        self.cursor = 0;
        self.responses.clear();

        Some(first)
    }

    /// Feed one received bus frame
    ///
    /// Only frames on the response identifier with at least 8 data bytes count
    /// as responses. The frame's 8 bytes are stored as-is, in request order.
    pub fn accept(&mut self, frame: &CanFrame) -> BatchStep {
        if self.is_idle() {
            return BatchStep::Ignored;
        }

        let Some(entry) = response_entry(frame, self.response_id) else {
            return BatchStep::Ignored;
        };

        self.responses.push(entry);
        self.cursor += 1;

        if self.cursor < self.hashes.len() {
            return BatchStep::Request(self.hashes[self.cursor]);
        }

        let payload = encode_batch_notification(&self.responses);
        self.reset();
        BatchStep::Complete(payload)
    }

    fn reset(&mut self) {
        self.hashes.clear();
        self.cursor = 0;
        self.responses.clear();
    }

    /// Whether no batch is in flight
    pub fn is_idle(&self) -> bool {
        self.cursor >= self.hashes.len()
    }

    /// Hash currently awaiting its response
    pub fn awaiting(&self) -> Option<VariableHash> {
        self.hashes.get(self.cursor).copied()
    }

    /// Hashes of the batch in flight
    pub fn pending(&self) -> &[VariableHash] {
        &self.hashes
    }

    /// Number of responses collected so far
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of accumulated response entries (always equal to the cursor)
    pub fn collected(&self) -> usize {
        self.responses.len()
    }
}
