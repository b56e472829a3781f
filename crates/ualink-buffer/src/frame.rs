// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Size-bounded frame assembly.

use crate::encoder::FRAME_CLOSING_LEN;

/// A finished frame ready for one publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame bytes, header through terminator.
    pub bytes: Vec<u8>,
    /// Number of records in the frame.
    pub notifications: usize,
}

impl Frame {
    /// Returns the frame size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for a frame without bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Accumulates encoded records under a byte budget.
///
/// A frame is opened with a header, grows by one separator and record per
/// push and is closed with a terminator. [`FrameBuilder::fits`] guarantees
/// the closed frame stays strictly below the budget.
#[derive(Debug)]
pub struct FrameBuilder {
    buffer: Vec<u8>,
    budget: usize,
    notifications: usize,
    started: bool,
}

impl FrameBuilder {
    /// Creates a builder for frames below `budget` bytes.
    pub fn new(budget: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(budget.min(64 * 1024)),
            budget,
            notifications: 0,
            started: false,
        }
    }

    /// Returns the byte budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Returns `true` once a header has been written.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Returns `true` if no record has been pushed.
    pub fn is_empty(&self) -> bool {
        self.notifications == 0
    }

    /// Returns the number of records pushed.
    pub fn notifications(&self) -> usize {
        self.notifications
    }

    /// Returns the current size including the header.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Opens a frame with `header`.
    pub fn begin(&mut self, header: &str) {
        self.buffer.clear();
        self.buffer.extend_from_slice(header.as_bytes());
        self.notifications = 0;
        self.started = true;
    }

    /// Returns `true` if a record of `record_len` bytes still fits.
    pub fn fits(&self, record_len: usize, separator_len: usize) -> bool {
        let separator = if self.notifications == 0 { 0 } else { separator_len };
        self.buffer.len() + separator + record_len + FRAME_CLOSING_LEN < self.budget
    }

    /// Appends a record. The caller checks [`FrameBuilder::fits`] first.
    pub fn push(&mut self, record: &str, separator: &str) {
        if self.notifications > 0 {
            self.buffer.extend_from_slice(separator.as_bytes());
        }
        self.buffer.extend_from_slice(record.as_bytes());
        self.notifications += 1;
    }

    /// Closes the frame and resets the builder.
    pub fn finish(&mut self, terminator: &str) -> Frame {
        let mut bytes = std::mem::take(&mut self.buffer);
        bytes.extend_from_slice(terminator.as_bytes());
        let notifications = self.notifications;
        self.notifications = 0;
        self.started = false;
        Frame {
            bytes,
            notifications,
        }
    }

    /// Drops the open frame without emitting it.
    pub fn discard(&mut self) -> usize {
        let dropped = self.notifications;
        self.buffer.clear();
        self.notifications = 0;
        self.started = false;
        dropped
    }
}

// =============================================================================
// Tests
// =============================================================================
