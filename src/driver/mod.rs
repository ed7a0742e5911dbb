// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Callback drivers.
//!
//! The scheduler is passive: something has to call `process` once per audio
//! block and `prefetch` whenever a buffer slot frees up. Two drivers are
//! provided:
//! - [`OfflineDriver`] runs callbacks back to back, for rendering and tests
//! - [`run_realtime`] paces callbacks on a tokio interval and prefetches in
//!   a separate task woken by the clock

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::midi::MidiSink;
use crate::sequencer::{PrefetchReport, Scheduler};
use crate::timing::{TempoClock, Transport};

/// Totals accumulated over a driver run
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Callbacks processed
    pub callbacks: u64,
    /// Frames advanced
    pub frames: i64,
    /// MIDI events written to the sink
    pub events: usize,
    /// Buffers synthesized
    pub buffers: usize,
    /// Sequences that reached end of material
    pub finished: Vec<String>,
    /// Sequences spawned during the run
    pub spawned: Vec<String>,
    /// Sequences removed after their logic failed
    pub failed: Vec<String>,
}

impl RunSummary {
    fn absorb(&mut self, report: PrefetchReport) {
        self.buffers += report.enqueued;
        self.finished.extend(report.finished);
        self.spawned.extend(report.spawned);
        self.failed
            .extend(report.failed.iter().filter_map(|e| e.failed_sequence().map(str::to_string)));
    }
}

/// Deterministic driver running callbacks as fast as possible
pub struct OfflineDriver {
    scheduler: Arc<Scheduler>,
    clock: Arc<TempoClock>,
    callback_frames: i64,
    summary: RunSummary,
}

impl OfflineDriver {
    pub fn new(scheduler: Arc<Scheduler>, clock: Arc<TempoClock>, callback_frames: u32) -> Self {
        Self {
            scheduler,
            clock,
            callback_frames: i64::from(callback_frames.max(1)),
            summary: RunSummary::default(),
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn clock(&self) -> &Arc<TempoClock> {
        &self.clock
    }

    pub fn callback_frames(&self) -> i64 {
        self.callback_frames
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Fill queues, then run a single callback. Returns events written.
    pub fn step(&mut self, sink: &mut dyn MidiSink) -> Result<usize> {
        // Every freed slot has to be refilled before the next block, so the
        // pending count only matters for tracing here.
        let pending = self.clock.take_pending_checks();
        let report = self.scheduler.prefetch(self.clock.as_ref())?;
        if pending > 0 || report.enqueued > 0 {
            debug!(pending, enqueued = report.enqueued, "prefetch pass");
        }
        self.summary.absorb(report);

        let written = self
            .scheduler
            .process(self.callback_frames, self.clock.as_ref(), sink);
        self.summary.callbacks += 1;
        self.summary.frames += self.callback_frames;
        self.summary.events += written;
        Ok(written)
    }

    /// Run `callbacks` callbacks, stopping early once no sequence is left
    pub fn run(&mut self, callbacks: u64, sink: &mut dyn MidiSink) -> Result<&RunSummary> {
        for _ in 0..callbacks {
            if self.scheduler.is_empty() {
                debug!(callbacks = self.summary.callbacks, "no sequences left");
                break;
            }
            self.step(sink)?;
        }
        Ok(&self.summary)
    }

    /// Run enough callbacks to cover `bars` bars at the current tempo
    pub fn run_bars(&mut self, bars: f64, sink: &mut dyn MidiSink) -> Result<&RunSummary> {
        let bar = self.clock.bar_length_in_frames()?;
        let frames = (bars.max(0.0) * bar as f64).ceil() as i64;
        let callbacks = (frames + self.callback_frames - 1) / self.callback_frames;
        self.run(callbacks as u64, sink)
    }
}

/// Options for [`run_realtime`]
#[derive(Debug, Clone)]
pub struct RealtimeOptions {
    /// Frames per callback
    pub callback_frames: u32,
    /// Stop after this long; `None` runs until Ctrl-C or until no
    /// sequence is left
    pub duration: Option<Duration>,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            callback_frames: 512,
            duration: None,
        }
    }
}

/// Drive `scheduler` in real time.
///
/// Callbacks fire on a tokio interval whose period matches the wall-clock
/// length of one block. Prefetching runs on the blocking pool whenever
/// `waker` is notified; `clock` must have been built with the same `Notify`
/// through [`TempoClock::with_waker`] so retired buffers wake it.
pub async fn run_realtime(
    scheduler: Arc<Scheduler>,
    clock: Arc<TempoClock>,
    waker: Arc<Notify>,
    mut sink: Box<dyn MidiSink>,
    options: RealtimeOptions,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    summary.absorb(scheduler.prefetch(clock.as_ref())?);

    let prefetch_task = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        let clock = Arc::clone(&clock);
        let waker = Arc::clone(&waker);
        async move {
            loop {
                waker.notified().await;
                clock.take_pending_checks();
                let scheduler = Arc::clone(&scheduler);
                let clock = Arc::clone(&clock);
                match tokio::task::spawn_blocking(move || scheduler.prefetch(clock.as_ref())).await {
                    Ok(Ok(report)) => {
                        if !report.finished.is_empty() || !report.failed.is_empty() {
                            info!(finished = ?report.finished, failed = report.failed.len(), "sequences removed");
                        }
                    }
                    Ok(Err(e)) => error!("prefetch aborted: {e}"),
                    Err(e) => error!("prefetch task failed: {e}"),
                }
            }
        }
    });

    let frames = i64::from(options.callback_frames.max(1));
    let mut interval = time::interval(clock.frames_to_duration(frames));
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let deadline = options.duration.map(|d| Instant::now() + d);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(frames, tempo = clock.tempo(), "realtime driver started");
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                info!("interrupted");
                break;
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) || scheduler.is_empty() {
            break;
        }
        summary.events += scheduler.process(frames, clock.as_ref(), sink.as_mut());
        summary.callbacks += 1;
        summary.frames += frames;
    }

    prefetch_task.abort();
    info!(callbacks = summary.callbacks, events = summary.events, "realtime driver stopped");
    Ok(summary)
}
