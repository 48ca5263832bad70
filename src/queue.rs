//! Deferred call queue
//!
//! Calls issued before authentication completes are held here verbatim -
//! method, arguments, and reply sink untouched - and replayed in insertion
//! order once the session authenticates. Deferral is invisible to the
//! caller: the call is delayed, never dropped.

use std::collections::VecDeque;

use serde_json::Value;

use crate::registry::ReplySink;

/// A call held until authentication completes
pub struct QueuedCall {
    pub method: String,
    pub args: Vec<Value>,
    pub sink: Option<ReplySink>,
}

/// FIFO buffer of deferred calls
#[derive(Default)]
pub struct CallQueue {
    entries: VecDeque<QueuedCall>,
}

impl CallQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a call to the back of the queue
    pub fn push(&mut self, call: QueuedCall) {
        self.entries.push_back(call);
    }

    /// Take every queued call in insertion order, leaving the queue empty
    pub fn drain(&mut self) -> VecDeque<QueuedCall> {
        std::mem::take(&mut self.entries)
    }

    /// Number of deferred calls
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
