// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Note humanization.
//!
//! A note-on draws a timing/velocity jitter sample and stores it under the
//! note's `(port, channel, note)` key; the matching note-off reuses it so the
//! pair moves together.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::midi::PortId;

/// A `[min, max]` jitter range
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HumanizeRange {
    pub min: f64,
    pub max: f64,
}

impl HumanizeRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> f64 {
        self.max - self.min
    }

    /// Draw a value in `[min, max)`; a degenerate range always yields `min`
    pub fn sample(&self, rng: &mut StdRng) -> f64 {
        let size = self.size();
        if size == 0.0 {
            self.min
        } else {
            self.min + rng.gen::<f64>() * size
        }
    }
}

impl From<[f64; 2]> for HumanizeRange {
    fn from(range: [f64; 2]) -> Self {
        Self::new(range[0], range[1])
    }
}

/// Key linking a note-on to its note-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteKey {
    pub port: PortId,
    pub channel: u8,
    pub note: u8,
}

/// Jitter applied to one note
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HumanizeDelta {
    /// Added to the normalized bar offset
    pub offset: f64,
    /// Added to the normalized velocity before clamping
    pub velocity: f64,
}

impl HumanizeDelta {
    pub const ZERO: HumanizeDelta = HumanizeDelta {
        offset: 0.0,
        velocity: 0.0,
    };
}

/// Keyed store of the most recent jitter drawn per note.
///
/// Entries are never evicted: a note-off reuses whatever delta was last
/// stored for its key, even when that note-on belonged to an unrelated note.
#[derive(Debug)]
pub struct NoteHumanizer {
    offset_range: HumanizeRange,
    velocity_range: HumanizeRange,
    entries: HashMap<NoteKey, HumanizeDelta>,
    rng: StdRng,
}

impl NoteHumanizer {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic humanizer for reproducible output
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            offset_range: HumanizeRange::default(),
            velocity_range: HumanizeRange::default(),
            entries: HashMap::new(),
            rng,
        }
    }

    pub fn set_offset_range(&mut self, range: HumanizeRange) {
        self.offset_range = range;
    }

    pub fn set_velocity_range(&mut self, range: HumanizeRange) {
        self.velocity_range = range;
    }

    pub fn offset_range(&self) -> HumanizeRange {
        self.offset_range
    }

    pub fn velocity_range(&self) -> HumanizeRange {
        self.velocity_range
    }

    /// Draw a fresh delta for a note-on and remember it under `key`
    pub fn note_on(&mut self, key: NoteKey) -> HumanizeDelta {
        let delta = HumanizeDelta {
            offset: self.offset_range.sample(&mut self.rng),
            velocity: self.velocity_range.sample(&mut self.rng),
        };
        self.entries.insert(key, delta);
        delta
    }

    /// Delta for a note-off: the last one stored under `key`, or zero
    pub fn note_off(&self, key: NoteKey) -> HumanizeDelta {
        self.entries.get(&key).copied().unwrap_or(HumanizeDelta::ZERO)
    }

    pub fn contains(&self, key: NoteKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for NoteHumanizer {
    fn default() -> Self {
        Self::new()
    }
}
