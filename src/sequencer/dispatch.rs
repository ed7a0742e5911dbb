// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Per-callback dispatch.
//!
//! Walks a sequence's buffer queue, emits every event falling inside the
//! current callback window with its offset relative to the callback start,
//! then retires buffers the cursor has fully passed.
//!
//! Events in a prepared buffer are sorted, so scanning a buffer goes through
//! three stages: events before the window, events inside it, events after
//! it. Once the scan has seen a match followed by a miss it is in the last
//! stage and stops; the cost per buffer is the leading misses plus the
//! matches plus one.
//!
//! Due procedures are collected rather than called, so that
//! [`Sequence::progress_cursor`] can run them after the sequence lock is
//! released. A procedure may then call back into the scheduler.

use std::sync::Arc;

use tracing::trace;

use super::event::{EventKind, Procedure};
use super::sequence::{Sequence, SequenceState};
use crate::midi::ResolvedEvent;
use crate::timing::Transport;

/// Counters describing one `progress_cursor` call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events tested against the window
    pub inspected: usize,
    /// MIDI events emitted
    pub emitted: usize,
    /// Procedures found due
    pub procedures: usize,
    /// Buffers retired from the front of the queue
    pub retired: usize,
}

/// Advance `state` by `nframes`, pushing due MIDI events to `out` and due
/// procedures, in dispatch order, to `procedures`.
pub fn progress_cursor(
    state: &mut SequenceState,
    nframes: i64,
    transport: &dyn Transport,
    out: &mut Vec<ResolvedEvent>,
    procedures: &mut Vec<Procedure>,
) -> DispatchStats {
    let mut stats = DispatchStats::default();
    let mut next_cursor = state.cursor + nframes;

    // Sum of the lengths of the buffers scanned so far; chains each buffer
    // after the previous one in the cursor's coordinate space.
    let mut cumulative_offset = 0i64;

    for buffer in state.buffers.iter() {
        let actual_cursor = state.cursor - cumulative_offset;
        let actual_next_cursor = next_cursor - cumulative_offset;

        let mut found = false;
        for event in buffer.iter() {
            stats.inspected += 1;
            if event.between(actual_cursor, actual_next_cursor) {
                found = true;
                match event.kind() {
                    EventKind::Midi { port, message } => {
                        out.push(ResolvedEvent {
                            port: *port,
                            offset: event.offset_in_frames() - actual_cursor,
                            message: *message,
                        });
                        stats.emitted += 1;
                    }
                    EventKind::Procedure(action) => {
                        procedures.push(Arc::clone(action));
                        stats.procedures += 1;
                    }
                }
            } else if found {
                break;
            }
        }

        cumulative_offset += buffer.length_in_frames();
    }

    // Retire only buffers the cursor has strictly passed, so events sitting
    // on or just past a bar end are still played.
    while let Some(length) = state.front_length_in_frames() {
        if length < state.cursor {
            state.cursor -= length;
            next_cursor -= length;
            state.buffers.pop_front();
            transport.notify_check_buffer();
            stats.retired += 1;
        } else {
            break;
        }
    }

    state.cursor = next_cursor;

    trace!(
        cursor = state.cursor,
        queued = state.buffers.len(),
        emitted = stats.emitted,
        retired = stats.retired,
        "cursor progressed"
    );
    stats
}

impl Sequence {
    /// Lock this sequence, run [`progress_cursor`] on it, then release the
    /// lock and invoke the due procedures in order.
    ///
    /// `procedures` is working space; it is left empty.
    pub fn progress_cursor(
        &self,
        nframes: i64,
        transport: &dyn Transport,
        out: &mut Vec<ResolvedEvent>,
        procedures: &mut Vec<Procedure>,
    ) -> DispatchStats {
        procedures.clear();
        let stats = progress_cursor(&mut self.state(), nframes, transport, out, procedures);
        for action in procedures.drain(..) {
            action();
        }
        stats
    }
}
