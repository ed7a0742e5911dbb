// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Event buffers.
//!
//! An [`EventBuffer`] holds the events of one bar. Logic fills it with
//! authoring calls at normalized offsets; [`EventBuffer::prepare`] then sorts
//! the events and resolves every offset into frames for the dispatcher.

use std::slice;

use tracing::debug;

use super::event::{Event, EventKind};
use super::humanize::{HumanizeRange, NoteHumanizer, NoteKey};
use crate::midi::{messages, MidiMessage, PortId};

/// Gap between note-on and note-off used by [`EventBuffer::note_hit`]
pub const DEFAULT_HIT_DURATION: f64 = 0.0025;

/// Ordered collection of events covering one bar
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Event>,
    /// Normalized bar length (1.0 = one full bar)
    length: f64,
    prepared: bool,
    bar_length_in_frames: i64,
    length_in_frames: i64,
    humanizer: NoteHumanizer,
}

impl EventBuffer {
    /// Create an empty buffer one bar long
    pub fn new() -> Self {
        Self::with_humanizer(NoteHumanizer::new())
    }

    /// Create an empty buffer drawing jitter from the given humanizer
    pub fn with_humanizer(humanizer: NoteHumanizer) -> Self {
        Self {
            events: Vec::with_capacity(10),
            length: 1.0,
            prepared: false,
            bar_length_in_frames: -1,
            length_in_frames: -1,
            humanizer,
        }
    }

    /// Normalized length of this buffer in bars
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn set_length(&mut self, length: f64) {
        debug!(length, "buffer length set");
        self.length = length;
    }

    /// Largest bar offset of any authored event (0.0 when empty)
    pub fn actual_length(&self) -> f64 {
        self.events
            .iter()
            .map(Event::bar_offset)
            .fold(0.0, f64::max)
    }

    pub fn set_humanize_offset(&mut self, min: f64, max: f64) {
        self.humanizer.set_offset_range(HumanizeRange::new(min, max));
    }

    pub fn set_humanize_velocity(&mut self, min: f64, max: f64) {
        self.humanizer.set_velocity_range(HumanizeRange::new(min, max));
    }

    /// Append a prebuilt event
    pub fn event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Append a raw payload. The offset is not range-checked; events may
    /// spill past the bar and the dispatcher still plays them.
    pub fn add_midi(&mut self, offset: f64, port: PortId, bytes: &[u8]) {
        self.events
            .push(Event::midi(offset, port, MidiMessage::new(bytes)));
    }

    /// Append a note-on, humanized with a fresh jitter sample
    pub fn note_on(&mut self, offset: f64, port: PortId, channel: u8, note: u8, velocity: f64) {
        let delta = self.humanizer.note_on(NoteKey {
            port,
            channel,
            note,
        });
        self.note(
            messages::NOTE_ON,
            offset + delta.offset,
            port,
            channel,
            note,
            velocity + delta.velocity,
        );
    }

    /// Append a note-off, humanized with the jitter of the matching note-on
    pub fn note_off(&mut self, offset: f64, port: PortId, channel: u8, note: u8, velocity: f64) {
        let delta = self.humanizer.note_off(NoteKey {
            port,
            channel,
            note,
        });
        self.note(
            messages::NOTE_OFF,
            offset + delta.offset,
            port,
            channel,
            note,
            velocity + delta.velocity,
        );
    }

    /// Note-on at `offset`, note-off [`DEFAULT_HIT_DURATION`] later
    pub fn note_hit(&mut self, offset: f64, port: PortId, channel: u8, note: u8, velocity: f64) {
        self.note_hit_for(offset, port, channel, note, velocity, DEFAULT_HIT_DURATION);
    }

    /// Note-on at `offset`, note-off `duration` bars later. A negative
    /// duration falls back to [`DEFAULT_HIT_DURATION`].
    pub fn note_hit_for(
        &mut self,
        offset: f64,
        port: PortId,
        channel: u8,
        note: u8,
        velocity: f64,
        duration: f64,
    ) {
        let duration = if duration < 0.0 {
            DEFAULT_HIT_DURATION
        } else {
            duration
        };
        self.note_on(offset, port, channel, note, velocity);
        self.note_off(offset + duration, port, channel, note, velocity);
    }

    /// Append a procedure event
    pub fn exec<F>(&mut self, offset: f64, action: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.push(Event::procedure(offset, action));
    }

    pub fn control_change(&mut self, offset: f64, port: PortId, channel: u8, controller: u8, value: u8) {
        let message = MidiMessage::channel(messages::CONTROL_CHANGE, channel, controller, value);
        self.events.push(Event::midi(offset, port, message));
    }

    pub fn program_change(&mut self, offset: f64, port: PortId, channel: u8, program: u8) {
        let message = MidiMessage::channel_short(messages::PROGRAM_CHANGE, channel, program);
        self.events.push(Event::midi(offset, port, message));
    }

    /// Pitch bend, `value` in `-8192..=8191` (0 = centre)
    pub fn pitch_bend(&mut self, offset: f64, port: PortId, channel: u8, value: i16) {
        let raw = (value.clamp(-8192, 8191) as i32 + 8192) as u16;
        let message = MidiMessage::channel(
            messages::PITCH_BEND,
            channel,
            (raw & 0x7F) as u8,
            (raw >> 7) as u8,
        );
        self.events.push(Event::midi(offset, port, message));
    }

    pub fn all_notes_off(&mut self, offset: f64, port: PortId, channel: u8) {
        self.control_change(offset, port, channel, messages::ALL_NOTES_OFF, 0);
    }

    fn note(&mut self, status: u8, offset: f64, port: PortId, channel: u8, note: u8, velocity: f64) {
        // Offsets outside the bar are allowed; velocity saturates.
        let velocity = velocity.clamp(0.0, 1.0);
        let message = MidiMessage::channel(status, channel, note, (127.0 * velocity).round() as u8);
        self.events.push(Event::midi(offset, port, message));
    }

    /// Optionally stable-sort the events, then resolve every offset into
    /// frames of a bar `bar_length_in_frames` long.
    pub fn prepare(&mut self, bar_length_in_frames: i64, sort: bool) {
        if sort {
            self.events.sort_by(Event::compare);
        }
        for event in &mut self.events {
            event.resolve(bar_length_in_frames);
        }
        self.bar_length_in_frames = bar_length_in_frames;
        self.length_in_frames = (self.length * bar_length_in_frames as f64).round() as i64;
        self.prepared = true;

        debug!(
            bar_length_in_frames,
            length_in_frames = self.length_in_frames,
            length = self.length,
            events = self.events.len(),
            "buffer prepared"
        );
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Bar length in frames used by the last `prepare`.
    ///
    /// # Panics
    /// If the buffer has not been prepared.
    pub fn bar_length_in_frames(&self) -> i64 {
        assert!(self.prepared, "EventBuffer::bar_length_in_frames called before prepare");
        self.bar_length_in_frames
    }

    /// Length of this buffer in frames.
    ///
    /// # Panics
    /// If the buffer has not been prepared.
    pub fn length_in_frames(&self) -> i64 {
        assert!(self.prepared, "EventBuffer::length_in_frames called before prepare");
        self.length_in_frames
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Log the buffer contents at debug level
    pub fn dump(&self) {
        debug!(
            length = self.length,
            length_in_frames = self.length_in_frames,
            "buffer dump"
        );
        for (i, event) in self.events.iter().enumerate() {
            match event.kind() {
                EventKind::Midi { port, message } => debug!(
                    index = i,
                    bar_offset = event.bar_offset(),
                    frames = event.offset_in_frames(),
                    port,
                    "midi {:02X?}",
                    message.as_bytes()
                ),
                EventKind::Procedure(_) => debug!(
                    index = i,
                    bar_offset = event.bar_offset(),
                    frames = event.offset_in_frames(),
                    "procedure"
                ),
            }
        }
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a EventBuffer {
    type Item = &'a Event;
    type IntoIter = slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
