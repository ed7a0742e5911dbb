// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! The generator interface implemented by sequence authors.

use std::fmt;

use anyhow::Result;

use super::buffer::EventBuffer;
use super::sequence::SyncType;

/// User-supplied generator producing one buffer per call.
pub trait Logic: Send {
    /// Fill `buffer` with the next bar of events.
    ///
    /// Returns `Ok(true)` to keep the sequence running and `Ok(false)` when
    /// the material is exhausted; the buffer filled by a `false` call is
    /// discarded and the sequence is unregistered. Errors are reported to
    /// the scheduler, which unregisters the sequence.
    fn process_output_note_buffer(
        &mut self,
        context: &mut LogicContext<'_>,
        buffer: &mut EventBuffer,
    ) -> Result<bool>;
}

impl<F> Logic for F
where
    F: FnMut(&mut LogicContext<'_>, &mut EventBuffer) -> Result<bool> + Send,
{
    fn process_output_note_buffer(
        &mut self,
        context: &mut LogicContext<'_>,
        buffer: &mut EventBuffer,
    ) -> Result<bool> {
        self(context, buffer)
    }
}

/// Build a [`Logic`] from a closure, letting the compiler infer its argument types
pub fn from_fn<F>(f: F) -> F
where
    F: FnMut(&mut LogicContext<'_>, &mut EventBuffer) -> Result<bool> + Send,
{
    f
}

/// Request to register a new sequence, synchronized to the one whose logic
/// issued it
pub struct SpawnRequest {
    pub name: String,
    /// Sync offset in bars
    pub offset: f64,
    /// Sync type; `None` inherits the spawning sequence's
    pub sync_type: Option<SyncType>,
    pub logic: Box<dyn Logic>,
}

impl fmt::Debug for SpawnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnRequest")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("sync_type", &self.sync_type)
            .finish_non_exhaustive()
    }
}

/// Context handed to [`Logic`] for one buffer synthesis call
#[derive(Debug)]
pub struct LogicContext<'a> {
    sequence: &'a str,
    sync_type: SyncType,
    bar_length_in_frames: i64,
    bar_index: u64,
    spawns: Vec<SpawnRequest>,
}

impl<'a> LogicContext<'a> {
    pub fn new(sequence: &'a str, sync_type: SyncType, bar_length_in_frames: i64, bar_index: u64) -> Self {
        Self {
            sequence,
            sync_type,
            bar_length_in_frames,
            bar_index,
            spawns: Vec::new(),
        }
    }

    /// Name of the sequence being filled
    pub fn sequence_name(&self) -> &str {
        self.sequence
    }

    /// Sync type of the sequence being filled
    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    /// Bar length the buffer will be prepared with
    pub fn bar_length_in_frames(&self) -> i64 {
        self.bar_length_in_frames
    }

    /// Number of buffers this sequence synthesized before this one
    pub fn bar_index(&self) -> u64 {
        self.bar_index
    }

    /// Spawn a child sequence with the same sync type as this one
    pub fn spawn(&mut self, name: impl Into<String>, offset: f64, logic: impl Logic + 'static) {
        self.spawns.push(SpawnRequest {
            name: name.into(),
            offset,
            sync_type: None,
            logic: Box::new(logic),
        });
    }

    /// Spawn a child sequence with an explicit sync type
    pub fn spawn_with_sync(
        &mut self,
        name: impl Into<String>,
        offset: f64,
        sync_type: SyncType,
        logic: impl Logic + 'static,
    ) {
        self.spawns.push(SpawnRequest {
            name: name.into(),
            offset,
            sync_type: Some(sync_type),
            logic: Box::new(logic),
        });
    }

    pub fn pending_spawns(&self) -> &[SpawnRequest] {
        &self.spawns
    }

    pub(crate) fn take_spawns(&mut self) -> Vec<SpawnRequest> {
        std::mem::take(&mut self.spawns)
    }
}
