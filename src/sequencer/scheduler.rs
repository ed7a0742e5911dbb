// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Sequence registry driven once per audio callback.
//!
//! The scheduler owns every live sequence. The audio thread calls
//! [`Scheduler::process`] once per callback; a prefetch agent (the same
//! thread or another one) calls [`Scheduler::prefetch`] to keep queues
//! filled, which is also where spawn requests and end-of-material are
//! handled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use super::event::Procedure;
use super::logic::SpawnRequest;
use super::prefetch::{PrefetchConfig, PrefetchOutcome, Prefetcher};
use super::sequence::{Sequence, SyncType};
use crate::error::{Result, SequencerError};
use crate::midi::{MidiSink, ResolvedEvent};
use crate::timing::Transport;

/// Summary of one prefetch pass
#[derive(Debug, Default)]
pub struct PrefetchReport {
    /// Buffers added across all sequences
    pub enqueued: usize,
    /// Sequences unregistered because their logic ended
    pub finished: Vec<String>,
    /// Sequences registered from spawn requests
    pub spawned: Vec<String>,
    /// Logic failures; the offending sequences were unregistered
    pub failed: Vec<SequencerError>,
}

/// Working space reused by every callback
struct Scratch {
    sequences: Vec<Arc<Sequence>>,
    events: Vec<ResolvedEvent>,
    procedures: Vec<Procedure>,
}

/// Registry of live sequences
pub struct Scheduler {
    sequences: Mutex<Vec<Arc<Sequence>>>,
    prefetcher: Prefetcher,
    scratch: Mutex<Scratch>,
}

impl Scheduler {
    pub fn new(prefetcher: Prefetcher) -> Self {
        Self {
            sequences: Mutex::new(Vec::new()),
            prefetcher,
            scratch: Mutex::new(Scratch {
                sequences: Vec::with_capacity(16),
                events: Vec::with_capacity(256),
                procedures: Vec::with_capacity(16),
            }),
        }
    }

    pub fn with_config(config: PrefetchConfig) -> Self {
        Self::new(Prefetcher::new(config))
    }

    pub fn prefetcher(&self) -> &Prefetcher {
        &self.prefetcher
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Arc<Sequence>>> {
        self.sequences.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a sequence, resolving its starting cursor from its sync
    /// relationship. It receives buffers on the next prefetch pass.
    pub fn register(&self, sequence: Sequence, transport: &dyn Transport) -> Result<Arc<Sequence>> {
        if self.contains(sequence.name()) {
            return Err(SequencerError::DuplicateSequence(sequence.name().to_string()));
        }

        let bar_length_in_frames = transport.bar_length_in_frames()?;
        // Sync resolution may lock the target; the registry lock is not held here.
        sequence.prepare(bar_length_in_frames);

        let sequence = Arc::new(sequence);
        let mut registry = self.registry();
        if registry.iter().any(|s| s.name() == sequence.name()) {
            return Err(SequencerError::DuplicateSequence(sequence.name().to_string()));
        }
        registry.push(Arc::clone(&sequence));
        info!(
            sequence = sequence.name(),
            sync = ?sequence.sync_type(),
            cursor = sequence.cursor(),
            "sequence registered"
        );
        Ok(sequence)
    }

    /// Register the child requested by `parent`'s logic, synchronized to `parent`
    pub fn register_spawn(
        &self,
        parent: &Arc<Sequence>,
        request: SpawnRequest,
        transport: &dyn Transport,
    ) -> Result<Arc<Sequence>> {
        let sync_type = request.sync_type.unwrap_or(parent.sync_type());
        let target = match sync_type {
            SyncType::Immediate => None,
            SyncType::Parallel | SyncType::Serial => Some(parent),
        };
        debug!(parent = parent.name(), child = %request.name, ?sync_type, "spawn requested");
        let child = Sequence::from_boxed(request.name, request.logic).with_sync(sync_type, target, request.offset);
        self.register(child, transport)
    }

    /// Remove a sequence by name
    pub fn unregister(&self, name: &str) -> Result<Arc<Sequence>> {
        let mut registry = self.registry();
        let index = registry
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| SequencerError::UnknownSequence(name.to_string()))?;
        let sequence = registry.remove(index);
        info!(sequence = name, "sequence unregistered");
        Ok(sequence)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Sequence>> {
        self.registry().iter().find(|s| s.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry().iter().any(|s| s.name() == name)
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<String> {
        self.registry().iter().map(|s| s.name().to_string()).collect()
    }

    /// Snapshot of the registered sequences in registration order
    pub fn sequences(&self) -> Vec<Arc<Sequence>> {
        self.registry().clone()
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry().is_empty()
    }

    /// Run one audio callback: clear the sink's ports, then progress every
    /// sequence by `nframes` in registration order, writing its events to
    /// `sink`. Returns the number of MIDI events written.
    ///
    /// The registry is copied up front, and neither it nor any sequence is
    /// locked while procedures run, so a procedure may register or
    /// unregister sequences. Changes take effect from the next callback.
    pub fn process(&self, nframes: i64, transport: &dyn Transport, sink: &mut dyn MidiSink) -> usize {
        sink.clear_ports();

        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        let Scratch {
            sequences,
            events,
            procedures,
        } = &mut *scratch;
        sequences.clear();
        sequences.extend(self.registry().iter().cloned());

        let mut written = 0;
        for sequence in sequences.iter() {
            events.clear();
            sequence.progress_cursor(nframes, transport, events, procedures);
            for event in events.iter() {
                match sink.write(event) {
                    Ok(()) => written += 1,
                    Err(e) => warn!(sequence = sequence.name(), "failed to write event: {e:#}"),
                }
            }
        }
        // Release the snapshot so unregistered sequences can drop.
        sequences.clear();
        written
    }

    /// Bring every queue up to the target depth.
    ///
    /// Sequences whose logic ends are unregistered. Sequences whose logic
    /// fails or panics are unregistered and their errors collected in the
    /// report. Spawned children are registered and filled in the same pass.
    /// A clock failure aborts the pass and is returned.
    pub fn prefetch(&self, transport: &dyn Transport) -> Result<PrefetchReport> {
        let mut report = PrefetchReport::default();
        let mut pending = self.sequences();
        let mut index = 0;

        while index < pending.len() {
            let sequence = Arc::clone(&pending[index]);
            index += 1;

            for _ in 0..self.prefetcher.target_depth() {
                let mut outcome = match self.prefetcher.check_buffer(&sequence, transport) {
                    Ok(outcome) => outcome,
                    Err(err @ SequencerError::Clock(_)) => return Err(err),
                    Err(err) => {
                        error!(sequence = sequence.name(), "prefetch failed: {err:#}");
                        // May already be gone if something else removed it.
                        let _ = self.unregister(sequence.name());
                        report.failed.push(err);
                        break;
                    }
                };

                for request in outcome.take_spawns() {
                    let name = request.name.clone();
                    match self.register_spawn(&sequence, request, transport) {
                        Ok(child) => {
                            report.spawned.push(name);
                            pending.push(child);
                        }
                        Err(err @ SequencerError::Clock(_)) => return Err(err),
                        Err(err) => warn!(parent = sequence.name(), child = %name, "spawn rejected: {err}"),
                    }
                }

                match outcome {
                    PrefetchOutcome::Full => break,
                    PrefetchOutcome::Enqueued { .. } => report.enqueued += 1,
                    PrefetchOutcome::Finished { .. } => {
                        let _ = self.unregister(sequence.name());
                        report.finished.push(sequence.name().to_string());
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Empty every queue and rewind every cursor (transport stop/reset)
    pub fn reset(&self) {
        for sequence in self.registry().iter() {
            sequence.clear_buffer();
        }
        debug!("all sequences reset");
    }

    /// Re-resolve all queued buffers after a tempo or signature change
    pub fn reprepare_all(&self, transport: &dyn Transport) -> Result<()> {
        let bar_length_in_frames = transport.bar_length_in_frames()?;
        for sequence in self.sequences() {
            sequence.reprepare(bar_length_in_frames);
        }
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Prefetcher::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("sequences", &self.names())
            .field("prefetcher", &self.prefetcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClockError;
    use crate::midi::RecordingSink;
    use crate::sequencer::logic::from_fn;
    use crate::timing::{TempoClock, TimeSignature};

    fn clock() -> TempoClock {
        // One bar = 1000 frames
        TempoClock::new(1_000, 240.0, TimeSignature::default()).unwrap()
    }

    fn seeded() -> Scheduler {
        Scheduler::with_config(PrefetchConfig {
            seed: Some(9),
            ..Default::default()
        })
    }

    fn beat(name: &str, note: u8) -> Sequence {
        Sequence::new(
            name,
            from_fn(move |_, buffer| {
                buffer.note_hit(0.0, 0, 0, note, 1.0);
                Ok(true)
            }),
        )
    }

    #[test]
    fn test_register_and_unregister() {
        let clock = clock();
        let scheduler = seeded();
        scheduler.register(beat("a", 60), &clock).unwrap();
        scheduler.register(beat("b", 62), &clock).unwrap();

        assert_eq!(scheduler.names(), vec!["a", "b"]);
        assert!(matches!(
            scheduler.register(beat("a", 64), &clock),
            Err(SequencerError::DuplicateSequence(_))
        ));

        scheduler.unregister("a").unwrap();
        assert_eq!(scheduler.len(), 1);
        assert!(matches!(
            scheduler.unregister("a"),
            Err(SequencerError::UnknownSequence(_))
        ));
    }

    #[test]
    fn test_process_in_registration_order() {
        let clock = clock();
        let scheduler = seeded();
        scheduler.register(beat("a", 60), &clock).unwrap();
        scheduler.register(beat("b", 62), &clock).unwrap();
        let report = scheduler.prefetch(&clock).unwrap();
        assert_eq!(report.enqueued, 4);

        let mut sink = RecordingSink::new();
        // Each hit's note-off lands 3 frames after its note-on.
        let written = scheduler.process(100, &clock, &mut sink);
        assert_eq!(written, 4);
        let notes: Vec<u8> = sink.current().iter().map(|e| e.message.as_bytes()[1]).collect();
        assert_eq!(notes, vec![60, 60, 62, 62]);
        assert_eq!(sink.current()[1].offset, 3);
        assert_eq!(sink.history().len(), 1);
    }

    #[test]
    fn test_end_of_material_unregisters() {
        let clock = clock();
        let scheduler = seeded();
        scheduler
            .register(Sequence::new("short", from_fn(|ctx, _| Ok(ctx.bar_index() < 1))), &clock)
            .unwrap();

        let report = scheduler.prefetch(&clock).unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(report.finished, vec!["short"]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_failing_logic_is_unregistered() {
        let clock = clock();
        let scheduler = seeded();
        scheduler
            .register(Sequence::new("bad", from_fn(|_, _| Err(anyhow::anyhow!("nope")))), &clock)
            .unwrap();
        scheduler.register(beat("good", 60), &clock).unwrap();

        let report = scheduler.prefetch(&clock).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].failed_sequence(), Some("bad"));
        assert_eq!(scheduler.names(), vec!["good"]);
        assert_eq!(report.enqueued, 2);
    }

    #[test]
    fn test_spawned_child_is_serial_to_parent() {
        let clock = clock();
        let scheduler = seeded();
        let parent = Sequence::new(
            "parent",
            from_fn(|ctx, buffer| {
                buffer.note_hit(0.0, 0, 0, 36, 1.0);
                if ctx.bar_index() == 0 {
                    ctx.spawn("child", 0.0, from_fn(|_, _| Ok(true)));
                }
                Ok(true)
            }),
        )
        .with_sync(SyncType::Serial, None, 0.0);
        scheduler.register(parent, &clock).unwrap();

        let report = scheduler.prefetch(&clock).unwrap();
        assert_eq!(report.spawned, vec!["child"]);
        assert_eq!(scheduler.names(), vec!["parent", "child"]);

        let child = scheduler.get("child").unwrap();
        assert_eq!(child.sync_type(), SyncType::Serial);
        assert_eq!(child.sync_target().unwrap().name(), "parent");
        // Parent cursor 0, front buffer 1000 frames long.
        assert_eq!(child.cursor(), -1_000);
        // Filled in the same pass.
        assert_eq!(child.buffer_count(), 2);
    }

    #[test]
    fn test_spawn_with_duplicate_name_is_rejected() {
        let clock = clock();
        let scheduler = seeded();
        scheduler.register(beat("child", 50), &clock).unwrap();
        scheduler
            .register(
                Sequence::new(
                    "parent",
                    from_fn(|ctx, _| {
                        ctx.spawn("child", 0.0, from_fn(|_, _| Ok(true)));
                        Ok(true)
                    }),
                ),
                &clock,
            )
            .unwrap();

        let report = scheduler.prefetch(&clock).unwrap();
        assert!(report.spawned.is_empty());
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn test_retirement_triggers_refill() {
        let clock = clock();
        let scheduler = seeded();
        let seq = scheduler.register(beat("a", 60), &clock).unwrap();
        scheduler.prefetch(&clock).unwrap();

        let mut sink = RecordingSink::new();
        // The front bar is retired once the cursor is strictly past it.
        for _ in 0..11 {
            scheduler.process(100, &clock, &mut sink);
        }
        assert_eq!(seq.buffer_count(), 2);
        scheduler.process(100, &clock, &mut sink);
        assert_eq!(seq.buffer_count(), 1);
        assert_eq!(clock.take_pending_checks(), 1);

        let report = scheduler.prefetch(&clock).unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(seq.buffer_count(), 2);
    }

    #[test]
    fn test_reset_and_reprepare() {
        let clock = clock();
        let scheduler = seeded();
        let seq = scheduler.register(beat("a", 60), &clock).unwrap();
        scheduler.prefetch(&clock).unwrap();

        clock.set_tempo(120.0);
        scheduler.reprepare_all(&clock).unwrap();
        assert_eq!(seq.state().front_length_in_frames(), Some(2_000));

        let mut sink = RecordingSink::new();
        scheduler.process(300, &clock, &mut sink);
        scheduler.reset();
        assert_eq!(seq.buffer_count(), 0);
        assert_eq!(seq.cursor(), 0);
    }

    #[test]
    fn test_clock_failure_propagates_from_register() {
        struct Stalled;
        impl Transport for Stalled {
            fn bar_length_in_frames(&self) -> std::result::Result<i64, ClockError> {
                Err(ClockError::Unavailable("stalled".to_string()))
            }
            fn notify_check_buffer(&self) {}
        }

        let scheduler = seeded();
        let err = scheduler.register(beat("a", 60), &Stalled).unwrap_err();
        assert!(matches!(err, SequencerError::Clock(_)));
        assert!(scheduler.is_empty());
        assert!(scheduler.reprepare_all(&Stalled).is_err());
    }

    #[test]
    fn test_procedure_can_unregister_its_own_sequence() {
        use std::sync::mpsc;
        use std::time::Duration;

        let clock = Arc::new(clock());
        let scheduler = Arc::new(seeded());
        let handle = Arc::downgrade(&scheduler);
        scheduler
            .register(
                Sequence::new(
                    "stopper",
                    from_fn(move |_, buffer| {
                        let handle = handle.clone();
                        buffer.exec(0.0, move || {
                            if let Some(scheduler) = handle.upgrade() {
                                assert!(scheduler.contains("stopper"));
                                scheduler.unregister("stopper").unwrap();
                            }
                        });
                        buffer.note_hit(0.5, 0, 0, 40, 1.0);
                        Ok(true)
                    }),
                ),
                clock.as_ref(),
            )
            .unwrap();
        scheduler.register(beat("keeper", 60), clock.as_ref()).unwrap();
        scheduler.prefetch(clock.as_ref()).unwrap();

        let (done, finished) = mpsc::channel();
        {
            let scheduler = Arc::clone(&scheduler);
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                let mut sink = RecordingSink::new();
                let first = scheduler.process(100, clock.as_ref(), &mut sink);
                let second = scheduler.process(600, clock.as_ref(), &mut sink);
                let _ = done.send((first, second));
            });
        }

        let (first, second) = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("process did not return");
        // Keeper's hit still plays in the same callback.
        assert_eq!(first, 2);
        assert_eq!(scheduler.names(), vec!["keeper"]);
        // The stopper's note at 0.5 is never dispatched.
        assert_eq!(second, 0);
    }
}
