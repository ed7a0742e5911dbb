// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Sequences: a cursor, a queue of prepared buffers and a generator.
//!
//! The cursor and the buffer queue are guarded together by one mutex; the
//! logic instance has its own lock so buffer synthesis never runs while the
//! queue is locked.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use super::buffer::EventBuffer;
use super::logic::Logic;

/// How a new sequence's starting cursor relates to another sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncType {
    /// Start from the sync offset alone
    #[default]
    Immediate,
    /// Track the target's cursor
    Parallel,
    /// Start where the target's front buffer ends
    Serial,
}

/// Cursor plus buffer queue, always locked as one unit
#[derive(Debug, Default)]
pub struct SequenceState {
    /// Playback position in frames relative to the front buffer; negative
    /// before the sequence has reached its first bar
    pub(crate) cursor: i64,
    pub(crate) buffers: VecDeque<EventBuffer>,
}

impl SequenceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(cursor: i64) -> Self {
        Self {
            cursor,
            buffers: VecDeque::new(),
        }
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: i64) {
        self.cursor = cursor;
    }

    pub fn buffers(&self) -> &VecDeque<EventBuffer> {
        &self.buffers
    }

    /// Append a prepared buffer to the back of the queue
    pub fn push_buffer(&mut self, buffer: EventBuffer) {
        debug_assert!(buffer.is_prepared(), "queued buffers must be prepared");
        self.buffers.push_back(buffer);
    }

    /// Frame length of the front buffer, if any
    pub fn front_length_in_frames(&self) -> Option<i64> {
        self.buffers.front().map(EventBuffer::length_in_frames)
    }
}

/// A track of generated buffers played against the shared clock
pub struct Sequence {
    name: String,
    id: u64,
    sync_type: SyncType,
    sync_target: Option<Weak<Sequence>>,
    /// Sync offset in bars; positive values delay the start
    sync_offset: f64,
    state: Mutex<SequenceState>,
    logic: Mutex<Box<dyn Logic>>,
    bars_synthesized: AtomicU64,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl Sequence {
    /// Create an immediately-synchronized sequence
    pub fn new(name: impl Into<String>, logic: impl Logic + 'static) -> Self {
        Self::from_boxed(name, Box::new(logic))
    }

    pub fn from_boxed(name: impl Into<String>, logic: Box<dyn Logic>) -> Self {
        Self {
            name: name.into(),
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            sync_type: SyncType::Immediate,
            sync_target: None,
            sync_offset: 0.0,
            state: Mutex::new(SequenceState::new()),
            logic: Mutex::new(logic),
            bars_synthesized: AtomicU64::new(0),
        }
    }

    /// Set the sync relationship. The target is held weakly; its lifetime
    /// belongs to the scheduler.
    pub fn with_sync(mut self, sync_type: SyncType, target: Option<&Arc<Sequence>>, offset: f64) -> Self {
        self.sync_type = sync_type;
        self.sync_target = target.map(Arc::downgrade);
        self.sync_offset = offset;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    pub fn sync_offset(&self) -> f64 {
        self.sync_offset
    }

    /// The sync target, if one was given and is still alive
    pub fn sync_target(&self) -> Option<Arc<Sequence>> {
        self.sync_target.as_ref().and_then(Weak::upgrade)
    }

    /// Lock the cursor and buffer queue
    pub fn state(&self) -> MutexGuard<'_, SequenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn logic(&self) -> MutexGuard<'_, Box<dyn Logic>> {
        self.logic.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cursor(&self) -> i64 {
        self.state().cursor
    }

    pub fn buffer_count(&self) -> usize {
        self.state().buffers.len()
    }

    /// Number of buffers the logic has produced so far
    pub fn bars_synthesized(&self) -> u64 {
        self.bars_synthesized.load(Ordering::Acquire)
    }

    pub(crate) fn next_bar_index(&self) -> u64 {
        self.bars_synthesized.fetch_add(1, Ordering::AcqRel)
    }

    /// Compute the initial cursor from the sync relationship.
    ///
    /// A missing target under `Parallel`/`Serial`, or a `Serial` target with
    /// an empty queue, falls back to `Immediate` with a warning.
    pub fn prepare(&self, bar_length_in_frames: i64) {
        let offset = (-self.sync_offset * bar_length_in_frames as f64) as i64;
        let target = self.sync_target();

        let cursor = match self.sync_type {
            SyncType::Immediate => {
                if self.sync_target.is_some() {
                    warn!(
                        sequence = %self.name,
                        "sync target was passed but ignored because sync type is `immediate`"
                    );
                }
                offset
            }
            SyncType::Parallel => match target {
                Some(target) => target.cursor() + offset,
                None => {
                    warn!(sequence = %self.name, "`parallel` was specified but no sync target is available");
                    offset
                }
            },
            SyncType::Serial => {
                // Read the target under its own lock only; ours is taken afterwards.
                let serial = target.and_then(|target| {
                    let state = target.state();
                    let front = state.front_length_in_frames()?;
                    Some(state.cursor - front)
                });
                match serial {
                    Some(base) => base + offset,
                    None => {
                        warn!(
                            sequence = %self.name,
                            "`serial` was specified but the sync target is missing or has no queued buffer"
                        );
                        offset
                    }
                }
            }
        };

        self.state().cursor = cursor;
        debug!(sequence = %self.name, sync = ?self.sync_type, cursor, "sequence prepared");
    }

    /// Re-resolve every queued buffer against a new bar length
    pub fn reprepare(&self, bar_length_in_frames: i64) {
        let mut state = self.state();
        for buffer in state.buffers.iter_mut() {
            buffer.prepare(bar_length_in_frames, true);
        }
        debug!(sequence = %self.name, bar_length_in_frames, buffers = state.buffers.len(), "sequence reprepared");
    }

    /// Drop every queued buffer and rewind the cursor to zero
    pub fn clear_buffer(&self) {
        let mut state = self.state();
        state.buffers.clear();
        state.cursor = 0;
    }

    pub(crate) fn enqueue(&self, buffer: EventBuffer) {
        self.state().push_buffer(buffer);
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("sync_type", &self.sync_type)
            .field("sync_offset", &self.sync_offset)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::logic::from_fn;

    fn idle(name: &str) -> Sequence {
        Sequence::new(name, from_fn(|_, _| Ok(true)))
    }

    fn prepared_buffer(bar_length_in_frames: i64) -> EventBuffer {
        let mut buffer = EventBuffer::new();
        buffer.prepare(bar_length_in_frames, true);
        buffer
    }

    fn target_with_cursor(cursor: i64) -> Arc<Sequence> {
        let target = Arc::new(idle("target"));
        {
            let mut state = target.state();
            state.set_cursor(cursor);
            state.push_buffer(prepared_buffer(48_000));
        }
        target
    }

    #[test]
    fn test_immediate_uses_offset() {
        let seq = idle("a").with_sync(SyncType::Immediate, None, 0.5);
        seq.prepare(48_000);
        assert_eq!(seq.cursor(), -24_000);
    }

    #[test]
    fn test_immediate_ignores_target() {
        let target = target_with_cursor(1_000);
        let seq = idle("a").with_sync(SyncType::Immediate, Some(&target), 0.0);
        seq.prepare(48_000);
        assert_eq!(seq.cursor(), 0);
    }

    #[test]
    fn test_serial_aligns_to_end_of_front_buffer() {
        let target = target_with_cursor(1_000);
        let seq = idle("b").with_sync(SyncType::Serial, Some(&target), 0.0);
        seq.prepare(48_000);
        assert_eq!(seq.cursor(), -47_000);
    }

    #[test]
    fn test_parallel_tracks_target_cursor() {
        let target = target_with_cursor(1_000);
        let seq = idle("c").with_sync(SyncType::Parallel, Some(&target), 0.0);
        seq.prepare(48_000);
        assert_eq!(seq.cursor(), 1_000);

        let delayed = idle("d").with_sync(SyncType::Parallel, Some(&target), 1.0);
        delayed.prepare(48_000);
        assert_eq!(delayed.cursor(), 1_000 - 48_000);
    }

    #[test]
    fn test_missing_target_falls_back_to_immediate() {
        let parallel = idle("p").with_sync(SyncType::Parallel, None, 0.25);
        parallel.prepare(1_000);
        assert_eq!(parallel.cursor(), -250);

        let serial = idle("s").with_sync(SyncType::Serial, None, 0.0);
        serial.prepare(1_000);
        assert_eq!(serial.cursor(), 0);
    }

    #[test]
    fn test_dropped_target_falls_back_to_immediate() {
        let target = target_with_cursor(5_000);
        let seq = idle("e").with_sync(SyncType::Parallel, Some(&target), 0.0);
        drop(target);
        assert!(seq.sync_target().is_none());
        seq.prepare(48_000);
        assert_eq!(seq.cursor(), 0);
    }

    #[test]
    fn test_serial_with_empty_target_queue_falls_back() {
        let target = Arc::new(idle("empty"));
        target.state().set_cursor(300);
        let seq = idle("f").with_sync(SyncType::Serial, Some(&target), 0.0);
        seq.prepare(48_000);
        assert_eq!(seq.cursor(), 0);
    }

    #[test]
    fn test_clear_buffer_resets_cursor() {
        let seq = target_with_cursor(777);
        assert_eq!(seq.buffer_count(), 1);
        seq.clear_buffer();
        assert_eq!(seq.buffer_count(), 0);
        assert_eq!(seq.cursor(), 0);
    }

    #[test]
    fn test_reprepare_updates_queued_buffers() {
        let seq = idle("r");
        let mut buffer = EventBuffer::new();
        buffer.add_midi(0.5, 0, &[0x90, 60, 100]);
        buffer.prepare(48_000, true);
        seq.enqueue(buffer);

        seq.reprepare(96_000);
        let state = seq.state();
        assert_eq!(state.front_length_in_frames(), Some(96_000));
        assert_eq!(state.buffers()[0].events()[0].offset_in_frames(), 48_000);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(idle("x").id(), idle("y").id());
    }
}
