// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Sequencer core for scheduling and playing MIDI events.
//!
//! This module provides the core sequencing infrastructure:
//! - Event buffers holding one bar of events each
//! - Note humanization linking note-on and note-off jitter
//! - Sequences with a cursor, a buffer queue and a sync relationship
//! - Sample-accurate dispatch once per audio callback
//! - Prefetching buffers ahead of playback through user logic
//! - A registry driving every live sequence

pub mod buffer;
pub mod dispatch;
pub mod event;
pub mod humanize;
pub mod logic;
pub mod prefetch;
pub mod scheduler;
pub mod sequence;

pub use buffer::{EventBuffer, DEFAULT_HIT_DURATION};
pub use dispatch::{progress_cursor, DispatchStats};
pub use event::{Event, EventKind, Procedure};
pub use humanize::{HumanizeDelta, HumanizeRange, NoteHumanizer, NoteKey};
pub use logic::{from_fn, Logic, LogicContext, SpawnRequest};
pub use prefetch::{PrefetchConfig, PrefetchOutcome, Prefetcher, DEFAULT_BUFFER_DEPTH};
pub use scheduler::{PrefetchReport, Scheduler};
pub use sequence::{Sequence, SequenceState, SyncType};
