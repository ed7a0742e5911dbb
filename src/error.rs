// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Error types for the scheduling core.

use thiserror::Error;

/// Failures raised by the audio-clock collaborator while resolving bar lengths.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClockError {
    /// Tempo must be finite and positive
    #[error("invalid tempo: {0} BPM")]
    InvalidTempo(f64),
    /// Sample rate must be non-zero
    #[error("invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
    /// Time signature must have a non-zero numerator and denominator
    #[error("invalid time signature: {0}/{1}")]
    InvalidTimeSignature(u8, u8),
    /// The driver could not report its transport position
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by sequences, the prefetcher and the scheduler.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// Bar length could not be computed
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// A sequence's logic returned an error while synthesizing a buffer
    #[error("logic of sequence `{sequence}` failed")]
    LogicFailed {
        sequence: String,
        #[source]
        source: anyhow::Error,
    },

    /// A sequence's logic panicked while synthesizing a buffer
    #[error("logic of sequence `{sequence}` panicked: {message}")]
    LogicPanicked { sequence: String, message: String },

    /// A sequence with this name is already registered
    #[error("sequence `{0}` is already registered")]
    DuplicateSequence(String),

    /// No sequence with this name is registered
    #[error("sequence `{0}` is not registered")]
    UnknownSequence(String),
}

impl SequencerError {
    /// Name of the sequence whose logic failed, if this is a logic failure
    pub fn failed_sequence(&self) -> Option<&str> {
        match self {
            SequencerError::LogicFailed { sequence, .. }
            | SequencerError::LogicPanicked { sequence, .. } => Some(sequence),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SequencerError>;
