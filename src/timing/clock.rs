// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Tempo clock implementation.
//!
//! Converts tempo, time signature and sample rate into a bar length in
//! frames, and collects "buffer slot freed" notifications for the prefetcher.

use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use super::Transport;
use crate::error::ClockError;

pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 300.0;

/// Time signature of the bar grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    /// Beats per bar (numerator)
    pub beats_per_bar: u8,
    /// Beat unit (denominator, 4 = quarter note)
    pub beat_unit: u8,
}

impl TimeSignature {
    pub fn new(beats_per_bar: u8, beat_unit: u8) -> Result<Self, ClockError> {
        if beats_per_bar == 0 || beat_unit == 0 {
            return Err(ClockError::InvalidTimeSignature(beats_per_bar, beat_unit));
        }
        Ok(Self {
            beats_per_bar,
            beat_unit,
        })
    }

    /// Bar length measured in quarter notes
    pub fn quarters_per_bar(&self) -> f64 {
        self.beats_per_bar as f64 * 4.0 / self.beat_unit as f64
    }

    fn to_bits(self) -> u16 {
        u16::from_be_bytes([self.beats_per_bar, self.beat_unit])
    }

    fn from_bits(bits: u16) -> Self {
        let [beats_per_bar, beat_unit] = bits.to_be_bytes();
        Self {
            beats_per_bar,
            beat_unit,
        }
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            beat_unit: 4,
        }
    }
}

/// Clock deriving frame-domain bar lengths from the musical tempo.
///
/// Tempo and signature live in atomics so a shared clock can follow
/// changes while the audio thread keeps reading it.
#[derive(Debug)]
pub struct TempoClock {
    sample_rate: u32,
    signature_bits: AtomicU16,
    tempo_bits: AtomicU64,
    pending_checks: AtomicUsize,
    waker: Option<Arc<Notify>>,
}

impl TempoClock {
    /// Create a clock; the tempo is clamped to 20-300 BPM
    pub fn new(sample_rate: u32, tempo: f64, signature: TimeSignature) -> Result<Self, ClockError> {
        if sample_rate == 0 {
            return Err(ClockError::InvalidSampleRate(sample_rate));
        }
        if !tempo.is_finite() || tempo <= 0.0 {
            return Err(ClockError::InvalidTempo(tempo));
        }
        Ok(Self {
            sample_rate,
            signature_bits: AtomicU16::new(signature.to_bits()),
            tempo_bits: AtomicU64::new(tempo.clamp(MIN_TEMPO, MAX_TEMPO).to_bits()),
            pending_checks: AtomicUsize::new(0),
            waker: None,
        })
    }

    /// Wake this `Notify` every time a buffer slot is freed
    pub fn with_waker(mut self, waker: Arc<Notify>) -> Self {
        self.waker = Some(waker);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn signature(&self) -> TimeSignature {
        TimeSignature::from_bits(self.signature_bits.load(Ordering::Acquire))
    }

    /// Change the bar grid. Like [`set_tempo`](Self::set_tempo), queued
    /// buffers need a reprepare to follow.
    pub fn set_signature(&self, signature: TimeSignature) {
        self.signature_bits.store(signature.to_bits(), Ordering::Release);
        debug!(
            beats_per_bar = signature.beats_per_bar,
            beat_unit = signature.beat_unit,
            "time signature changed"
        );
    }

    pub fn tempo(&self) -> f64 {
        f64::from_bits(self.tempo_bits.load(Ordering::Acquire))
    }

    /// Set the tempo immediately. Queued buffers keep their old frame
    /// offsets until they are reprepared.
    pub fn set_tempo(&self, tempo: f64) {
        let tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.tempo_bits.store(tempo.to_bits(), Ordering::Release);
        debug!(tempo, "tempo changed");
    }

    /// Nudge tempo by a delta
    pub fn nudge_tempo(&self, delta: f64) {
        self.set_tempo(self.tempo() + delta);
    }

    /// Frames per beat unit at the current tempo
    pub fn frames_per_beat(&self) -> f64 {
        let quarter = self.sample_rate as f64 * 60.0 / self.tempo();
        quarter * 4.0 / self.signature().beat_unit as f64
    }

    /// Wall-clock duration of a block of frames
    pub fn frames_to_duration(&self, frames: i64) -> Duration {
        Duration::from_secs_f64(frames.max(0) as f64 / self.sample_rate as f64)
    }

    /// Number of slot-freed notifications received since the last call
    pub fn take_pending_checks(&self) -> usize {
        self.pending_checks.swap(0, Ordering::AcqRel)
    }
}

impl Default for TempoClock {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            signature_bits: AtomicU16::new(TimeSignature::default().to_bits()),
            tempo_bits: AtomicU64::new(120.0f64.to_bits()),
            pending_checks: AtomicUsize::new(0),
            waker: None,
        }
    }
}

impl Transport for TempoClock {
    fn bar_length_in_frames(&self) -> Result<i64, ClockError> {
        let tempo = self.tempo();
        if !tempo.is_finite() || tempo <= 0.0 {
            return Err(ClockError::InvalidTempo(tempo));
        }
        let signature = self.signature();
        if signature.beats_per_bar == 0 || signature.beat_unit == 0 {
            return Err(ClockError::InvalidTimeSignature(
                signature.beats_per_bar,
                signature.beat_unit,
            ));
        }
        let quarter = self.sample_rate as f64 * 60.0 / tempo;
        Ok((quarter * signature.quarters_per_bar()).round() as i64)
    }

    fn notify_check_buffer(&self) {
        self.pending_checks.fetch_add(1, Ordering::AcqRel);
        if let Some(waker) = &self.waker {
            waker.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_creation() {
        let clock = TempoClock::new(48_000, 120.0, TimeSignature::default()).unwrap();
        assert_eq!(clock.tempo(), 120.0);
        assert_eq!(clock.sample_rate(), 48_000);
        assert_eq!(clock.signature(), TimeSignature::default());
    }

    #[test]
    fn test_clock_rejects_invalid_settings() {
        assert_eq!(
            TempoClock::new(0, 120.0, TimeSignature::default()).unwrap_err(),
            ClockError::InvalidSampleRate(0)
        );
        assert!(matches!(
            TempoClock::new(48_000, f64::NAN, TimeSignature::default()),
            Err(ClockError::InvalidTempo(_))
        ));
        assert_eq!(
            TimeSignature::new(0, 4).unwrap_err(),
            ClockError::InvalidTimeSignature(0, 4)
        );
    }

    #[test]
    fn test_tempo_clamping() {
        let clock = TempoClock::new(48_000, 10.0, TimeSignature::default()).unwrap();
        assert_eq!(clock.tempo(), MIN_TEMPO);

        clock.set_tempo(500.0);
        assert_eq!(clock.tempo(), MAX_TEMPO);
    }

    #[test]
    fn test_bar_length_in_frames() {
        // 120 BPM, 4/4: one bar = 2 seconds
        let clock = TempoClock::new(48_000, 120.0, TimeSignature::default()).unwrap();
        assert_eq!(clock.bar_length_in_frames().unwrap(), 96_000);

        // 3/4 at 60 BPM: three seconds
        let clock = TempoClock::new(44_100, 60.0, TimeSignature::new(3, 4).unwrap()).unwrap();
        assert_eq!(clock.bar_length_in_frames().unwrap(), 132_300);

        // 6/8 at 120 BPM: three quarter notes
        let clock = TempoClock::new(48_000, 120.0, TimeSignature::new(6, 8).unwrap()).unwrap();
        assert_eq!(clock.bar_length_in_frames().unwrap(), 72_000);
    }

    #[test]
    fn test_shared_clock_follows_signature_change() {
        let clock = Arc::new(TempoClock::default());
        let audio = Arc::clone(&clock);
        assert_eq!(audio.bar_length_in_frames().unwrap(), 96_000);

        clock.set_signature(TimeSignature::new(7, 8).unwrap());
        assert_eq!(audio.signature(), TimeSignature::new(7, 8).unwrap());
        assert_eq!(audio.bar_length_in_frames().unwrap(), 84_000);
        assert_eq!(audio.frames_per_beat(), 12_000.0);
    }

    #[test]
    fn test_nudge_tempo() {
        let clock = TempoClock::default();
        clock.nudge_tempo(5.0);
        assert_eq!(clock.tempo(), 125.0);
        clock.nudge_tempo(-10.0);
        assert_eq!(clock.tempo(), 115.0);
    }

    #[test]
    fn test_pending_checks() {
        let clock = TempoClock::default();
        clock.notify_check_buffer();
        clock.notify_check_buffer();
        assert_eq!(clock.take_pending_checks(), 2);
        assert_eq!(clock.take_pending_checks(), 0);
    }

    #[test]
    fn test_frames_to_duration() {
        let clock = TempoClock::default();
        assert_eq!(clock.frames_to_duration(48_000), Duration::from_secs(1));
        assert_eq!(clock.frames_to_duration(-5), Duration::ZERO);
        assert_eq!(clock.frames_per_beat(), 24_000.0);
    }
}
