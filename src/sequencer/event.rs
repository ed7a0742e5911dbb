// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Schedulable events.
//!
//! An event is authored at a normalized bar offset and resolved to an
//! integer frame offset when its owning buffer is prepared.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::midi::{MidiMessage, PortId};

/// Side-effecting callback run by the dispatcher when its time arrives
pub type Procedure = Arc<dyn Fn() + Send + Sync>;

/// Payload of an event
#[derive(Clone)]
pub enum EventKind {
    /// Raw MIDI payload bound to an output port
    Midi { port: PortId, message: MidiMessage },
    /// Arbitrary callback, invoked synchronously from the dispatcher
    Procedure(Procedure),
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Midi { port, message } => f
                .debug_struct("Midi")
                .field("port", port)
                .field("message", message)
                .finish(),
            EventKind::Procedure(_) => f.write_str("Procedure"),
        }
    }
}

/// One schedulable occurrence inside an event buffer
#[derive(Debug, Clone)]
pub struct Event {
    bar_offset: f64,
    offset_in_frames: i64,
    kind: EventKind,
}

impl Event {
    /// Create a MIDI event at a normalized bar offset
    pub fn midi(bar_offset: f64, port: PortId, message: MidiMessage) -> Self {
        Self {
            bar_offset,
            offset_in_frames: 0,
            kind: EventKind::Midi { port, message },
        }
    }

    /// Create a procedure event at a normalized bar offset
    pub fn procedure<F>(bar_offset: f64, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            bar_offset,
            offset_in_frames: 0,
            kind: EventKind::Procedure(Arc::new(action)),
        }
    }

    /// Normalized position within the bar (may lie outside `[0, 1)`)
    pub fn bar_offset(&self) -> f64 {
        self.bar_offset
    }

    /// Frame offset within the owning buffer; meaningful once the buffer is prepared
    pub fn offset_in_frames(&self) -> i64 {
        self.offset_in_frames
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// MIDI payload, if this is a MIDI event
    pub fn message(&self) -> Option<&MidiMessage> {
        match &self.kind {
            EventKind::Midi { message, .. } => Some(message),
            EventKind::Procedure(_) => None,
        }
    }

    /// True iff `from <= offset_in_frames < to`
    #[inline]
    pub fn between(&self, from: i64, to: i64) -> bool {
        from <= self.offset_in_frames && self.offset_in_frames < to
    }

    pub(crate) fn resolve(&mut self, bar_length_in_frames: i64) {
        self.offset_in_frames = (self.bar_offset * bar_length_in_frames as f64).round() as i64;
    }

    /// Buffer ordering: bar offset first; at the same offset MIDI events
    /// come before procedures and are ordered by their bytes, then port.
    ///
    /// Procedures only tie with each other, so a stable sort keeps their
    /// authoring order.
    pub fn compare(a: &Event, b: &Event) -> Ordering {
        a.bar_offset
            .total_cmp(&b.bar_offset)
            .then_with(|| match (&a.kind, &b.kind) {
                (
                    EventKind::Midi { port: pa, message: ma },
                    EventKind::Midi { port: pb, message: mb },
                ) => ma.cmp(mb).then(pa.cmp(pb)),
                (EventKind::Midi { .. }, EventKind::Procedure(_)) => Ordering::Less,
                (EventKind::Procedure(_), EventKind::Midi { .. }) => Ordering::Greater,
                (EventKind::Procedure(_), EventKind::Procedure(_)) => Ordering::Equal,
            })
    }
}
