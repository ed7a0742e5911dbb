// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI payloads and the output sink abstraction.
//!
//! The scheduling core never talks to a wire transport itself. It hands
//! `(port, frame offset, bytes)` tuples to a [`MidiSink`], which belongs to
//! whatever driver binding hosts the engine.

use std::cmp::Ordering;
use std::fmt;

use anyhow::Result;
use tracing::debug;

/// Index of an output port owned by the driver
pub type PortId = usize;

/// MIDI message constants
pub mod messages {
    // Channel Voice Messages (upper nibble, lower nibble is channel 0-15)
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_AFTERTOUCH: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_AFTERTOUCH: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;

    // Channel Mode controller numbers
    pub const ALL_NOTES_OFF: u8 = 0x7B;

    pub const STATUS_MASK: u8 = 0xF0;
    pub const CHANNEL_MASK: u8 = 0x0F;
}

/// A raw MIDI payload of at most three bytes, stored inline.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiMessage {
    bytes: [u8; 3],
    len: u8,
}

impl MidiMessage {
    /// Build a message from up to three bytes; extra bytes are dropped.
    pub fn new(data: &[u8]) -> Self {
        let len = data.len().min(3);
        let mut bytes = [0u8; 3];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    /// Channel voice message with the status nibble and channel combined
    pub fn channel(status: u8, channel: u8, data1: u8, data2: u8) -> Self {
        let status = (status & messages::STATUS_MASK) | (channel & messages::CHANNEL_MASK);
        Self::new(&[status, data1 & 0x7F, data2 & 0x7F])
    }

    /// Two-byte channel message (program change, channel aftertouch)
    pub fn channel_short(status: u8, channel: u8, data1: u8) -> Self {
        let status = (status & messages::STATUS_MASK) | (channel & messages::CHANNEL_MASK);
        Self::new(&[status, data1 & 0x7F])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Status nibble without the channel
    pub fn status(&self) -> Option<u8> {
        self.as_bytes().first().map(|b| b & messages::STATUS_MASK)
    }

    pub fn is_note_on(&self) -> bool {
        self.status() == Some(messages::NOTE_ON)
    }

    pub fn is_note_off(&self) -> bool {
        self.status() == Some(messages::NOTE_OFF)
    }
}

impl fmt::Debug for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MidiMessage({:02X?})", self.as_bytes())
    }
}

// Numeric comparison of the underlying bytes, shorter messages first on a common prefix.
impl Ord for MidiMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PartialOrd for MidiMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One output event resolved into the current callback's frame window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEvent {
    /// Output port
    pub port: PortId,
    /// Frame offset counted from the start of the current callback
    pub offset: i64,
    /// Raw payload
    pub message: MidiMessage,
}

/// Trait for the external event transport that receives dispatched events.
///
/// Called from the audio callback; implementations must not block.
pub trait MidiSink: Send {
    /// Reset per-port accumulation state. Called once per callback before
    /// any sequence is processed.
    fn clear_ports(&mut self);

    /// Write one event into the port buffer at a frame offset within the callback.
    fn write(&mut self, event: &ResolvedEvent) -> Result<()>;
}

/// Sink that keeps every event in memory, grouped per callback
#[derive(Debug, Default)]
pub struct RecordingSink {
    current: Vec<ResolvedEvent>,
    history: Vec<Vec<ResolvedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written since the last `clear_ports`
    pub fn current(&self) -> &[ResolvedEvent] {
        &self.current
    }

    /// Events of every completed callback, oldest first
    pub fn history(&self) -> &[Vec<ResolvedEvent>] {
        &self.history
    }

    /// Events grouped per callback, the one in progress last. Every
    /// callback opens with `clear_ports`, so the block recorded before the
    /// first call is skipped.
    pub fn callbacks(&self) -> impl Iterator<Item = &[ResolvedEvent]> {
        self.history
            .iter()
            .skip(1)
            .map(Vec::as_slice)
            .chain(std::iter::once(self.current.as_slice()))
    }

    /// All events written so far, flattened
    pub fn all_events(&self) -> Vec<ResolvedEvent> {
        self.history
            .iter()
            .flatten()
            .chain(self.current.iter())
            .copied()
            .collect()
    }
}

impl MidiSink for RecordingSink {
    fn clear_ports(&mut self) {
        let finished = std::mem::take(&mut self.current);
        self.history.push(finished);
    }

    fn write(&mut self, event: &ResolvedEvent) -> Result<()> {
        self.current.push(*event);
        Ok(())
    }
}

/// Sink that reports events through `tracing`, tagged with a running frame clock
#[derive(Debug, Default)]
pub struct TracingSink {
    block: u64,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MidiSink for TracingSink {
    fn clear_ports(&mut self) {
        self.block += 1;
    }

    fn write(&mut self, event: &ResolvedEvent) -> Result<()> {
        debug!(
            block = self.block,
            port = event.port,
            offset = event.offset,
            "midi {:02X?}",
            event.message.as_bytes()
        );
        Ok(())
    }
}
