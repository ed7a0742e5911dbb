// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Sample-accurate bar-buffered MIDI scheduling for live coding.
//!
//! Sequences synthesize one bar at a time through user [`Logic`], queue the
//! resulting [`EventBuffer`]s ahead of playback, and have their events
//! dispatched with frame offsets inside each audio callback.

pub mod config;
pub mod driver;
pub mod error;
pub mod midi;
pub mod sequencer;
pub mod timing;

pub use config::EngineConfig;
pub use driver::{run_realtime, OfflineDriver, RealtimeOptions, RunSummary};
pub use error::{ClockError, Result, SequencerError};
pub use midi::{MidiMessage, MidiSink, PortId, RecordingSink, ResolvedEvent, TracingSink};
pub use sequencer::{
    from_fn, EventBuffer, Logic, LogicContext, Scheduler, Sequence, SpawnRequest, SyncType,
};
pub use timing::{TempoClock, TimeSignature, Transport};
