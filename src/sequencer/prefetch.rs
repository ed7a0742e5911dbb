// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Keeps sequence queues filled ahead of playback.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, info};

use super::buffer::EventBuffer;
use super::humanize::{HumanizeRange, NoteHumanizer};
use super::logic::{LogicContext, SpawnRequest};
use super::sequence::Sequence;
use crate::error::{Result, SequencerError};
use crate::timing::Transport;

/// Default number of buffers kept queued per sequence
pub const DEFAULT_BUFFER_DEPTH: usize = 2;

/// Settings applied to every buffer the prefetcher allocates
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchConfig {
    /// Buffers to keep queued per sequence
    pub target_depth: usize,
    /// Default timing jitter for fresh buffers
    pub humanize_offset: HumanizeRange,
    /// Default velocity jitter for fresh buffers
    pub humanize_velocity: HumanizeRange,
    /// Seed for reproducible humanization
    pub seed: Option<u64>,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            target_depth: DEFAULT_BUFFER_DEPTH,
            humanize_offset: HumanizeRange::default(),
            humanize_velocity: HumanizeRange::default(),
            seed: None,
        }
    }
}

/// Result of one `check_buffer` call
#[derive(Debug)]
pub enum PrefetchOutcome {
    /// The queue was already at its target depth
    Full,
    /// A new buffer was queued
    Enqueued { spawns: Vec<SpawnRequest> },
    /// The logic signalled end of material; the sequence should be unregistered
    Finished { spawns: Vec<SpawnRequest> },
}

impl PrefetchOutcome {
    pub fn take_spawns(&mut self) -> Vec<SpawnRequest> {
        match self {
            PrefetchOutcome::Full => Vec::new(),
            PrefetchOutcome::Enqueued { spawns } | PrefetchOutcome::Finished { spawns } => {
                std::mem::take(spawns)
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, PrefetchOutcome::Finished { .. })
    }
}

/// Synthesizes buffers through each sequence's logic
#[derive(Debug, Clone, Default)]
pub struct Prefetcher {
    config: PrefetchConfig,
}

impl Prefetcher {
    pub fn new(config: PrefetchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    pub fn target_depth(&self) -> usize {
        self.config.target_depth
    }

    /// Allocate an empty buffer carrying the configured humanization
    pub fn new_buffer(&self, sequence: &Sequence, bar_index: u64) -> EventBuffer {
        let humanizer = match self.config.seed {
            Some(seed) => NoteHumanizer::with_seed(
                seed ^ sequence.id().rotate_left(32) ^ bar_index.wrapping_mul(0x9E37_79B9_7F4A_7C15),
            ),
            None => NoteHumanizer::new(),
        };
        let mut buffer = EventBuffer::with_humanizer(humanizer);
        let HumanizeRange { min, max } = self.config.humanize_offset;
        buffer.set_humanize_offset(min, max);
        let HumanizeRange { min, max } = self.config.humanize_velocity;
        buffer.set_humanize_velocity(min, max);
        buffer
    }

    /// Add one buffer to `sequence` if its queue is below the target depth.
    ///
    /// The logic runs outside the sequence's queue lock. Errors and panics
    /// raised by it are returned as [`SequencerError::LogicFailed`] and
    /// [`SequencerError::LogicPanicked`]; the queue is left untouched.
    pub fn check_buffer(&self, sequence: &Sequence, transport: &dyn Transport) -> Result<PrefetchOutcome> {
        if sequence.buffer_count() >= self.config.target_depth {
            return Ok(PrefetchOutcome::Full);
        }

        let bar_length_in_frames = transport.bar_length_in_frames()?;
        let bar_index = sequence.next_bar_index();
        let mut buffer = self.new_buffer(sequence, bar_index);
        let mut context = LogicContext::new(
            sequence.name(),
            sequence.sync_type(),
            bar_length_in_frames,
            bar_index,
        );

        let result = {
            let mut logic = sequence.logic();
            panic::catch_unwind(AssertUnwindSafe(|| {
                logic.process_output_note_buffer(&mut context, &mut buffer)
            }))
        };

        let keep = match result {
            Ok(Ok(keep)) => keep,
            Ok(Err(source)) => {
                return Err(SequencerError::LogicFailed {
                    sequence: sequence.name().to_string(),
                    source,
                })
            }
            Err(payload) => {
                return Err(SequencerError::LogicPanicked {
                    sequence: sequence.name().to_string(),
                    message: panic_message(payload.as_ref()),
                })
            }
        };

        let spawns = context.take_spawns();
        buffer.prepare(bar_length_in_frames, true);

        if keep {
            debug!(
                sequence = sequence.name(),
                bar_index,
                events = buffer.len(),
                "buffer queued"
            );
            sequence.enqueue(buffer);
            Ok(PrefetchOutcome::Enqueued { spawns })
        } else {
            info!(sequence = sequence.name(), bar_index, "logic reached end of material");
            Ok(PrefetchOutcome::Finished { spawns })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
