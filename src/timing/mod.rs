// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Timing and clock module.
//!
//! This module defines the audio-clock collaborator consumed by the
//! scheduling core, plus a tempo-driven implementation of it.

pub mod clock;

pub use clock::{TempoClock, TimeSignature, MAX_TEMPO, MIN_TEMPO};

use crate::error::ClockError;

/// The audio-clock collaborator.
///
/// Implemented by the driver binding. The core asks it for the current bar
/// length and tells it whenever a buffer slot has been freed so that
/// prefetching can be scheduled.
pub trait Transport: Send + Sync {
    /// Length of one bar in frames at the current tempo, signature and sample rate
    fn bar_length_in_frames(&self) -> Result<i64, ClockError>;

    /// A sequence retired a buffer; its queue has room for another one
    fn notify_check_buffer(&self);
}
