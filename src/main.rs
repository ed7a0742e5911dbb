// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use barline::config::{ConfigEvent, ConfigWatcher};
use barline::sequencer::{EventBuffer, Logic, LogicContext};
use barline::{
    from_fn, run_realtime, EngineConfig, OfflineDriver, RealtimeOptions, RecordingSink, Scheduler, Sequence,
    SyncType, TempoClock, TracingSink, Transport,
};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DRUM_CHANNEL: u8 = 9;
const KICK: u8 = 36;
const SNARE: u8 = 38;
const CLOSED_HAT: u8 = 42;

fn print_usage() {
    println!("barline - bar-buffered MIDI scheduler");
    println!();
    println!("Usage: barline [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  --render [BARS]         Render the demo pattern offline (default 8 bars)");
    println!("  --play [SECONDS]        Play the demo pattern in real time (default: until Ctrl-C)");
    println!("  --help                  Show this help message");
    println!();
    println!("Options:");
    println!("  --config <PATH>         Load engine settings from a YAML or TOML file");
    println!("  --bpm <BPM>             Override the configured tempo");
    println!("  --watch                 Reload the config file while playing");
}

/// Kick and hat groove; every fourth bar spawns a snare fill that starts
/// when the current bar ends
struct DemoBeat {
    fill_tail: u64,
}

impl Logic for DemoBeat {
    fn process_output_note_buffer(
        &mut self,
        context: &mut LogicContext<'_>,
        buffer: &mut EventBuffer,
    ) -> Result<bool> {
        for beat in 0..4 {
            let offset = beat as f64 / 4.0;
            buffer.note_hit(offset, 0, DRUM_CHANNEL, KICK, 1.0);
            buffer.note_hit(offset + 0.125, 0, DRUM_CHANNEL, CLOSED_HAT, 0.6);
        }

        let bar = context.bar_index();
        if bar % 4 == 3 {
            let fill_tail = self.fill_tail;
            context.spawn_with_sync(
                format!("fill-{bar}"),
                0.0,
                SyncType::Serial,
                from_fn(move |ctx, buffer| {
                    if ctx.bar_index() == 0 {
                        for step in 0..8 {
                            let velocity = 0.4 + step as f64 * 0.075;
                            buffer.note_hit(0.5 + step as f64 / 16.0, 0, DRUM_CHANNEL, SNARE, velocity);
                        }
                    }
                    // Queued bars are dropped when the logic ends, so pad
                    // with empty bars until the fill has played.
                    Ok(ctx.bar_index() < fill_tail)
                }),
            );
        }
        Ok(true)
    }
}

struct Options {
    config: EngineConfig,
    config_path: Option<String>,
    watch: bool,
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut config_path = None;
    let mut bpm = None;
    let mut watch = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                let path = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--config requires a path"))?;
                config_path = Some(path.clone());
                i += 1;
            }
            "--bpm" => {
                let value = args.get(i + 1).ok_or_else(|| anyhow!("--bpm requires a value"))?;
                bpm = Some(
                    value
                        .parse::<f64>()
                        .map_err(|_| anyhow!("Invalid tempo: {}", value))?,
                );
                i += 1;
            }
            "--watch" => watch = true,
            _ => {}
        }
        i += 1;
    }

    let mut config = match &config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(bpm) = bpm {
        config.tempo = bpm;
    }

    Ok(Options {
        config,
        config_path,
        watch,
    })
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build(config: &EngineConfig, clock: &TempoClock) -> Result<Arc<Scheduler>> {
    let scheduler = Arc::new(Scheduler::with_config(config.to_prefetch_config()));
    scheduler.register(
        Sequence::new(
            "beat",
            DemoBeat {
                fill_tail: config.buffer_depth as u64,
            },
        ),
        clock,
    )?;
    Ok(scheduler)
}

fn render(options: &Options, bars: f64) -> Result<()> {
    let clock = Arc::new(options.config.to_clock()?);
    let scheduler = build(&options.config, &clock)?;
    let mut driver = OfflineDriver::new(scheduler, Arc::clone(&clock), options.config.callback_frames);
    let mut sink = RecordingSink::new();

    let summary = driver.run_bars(bars, &mut sink)?;
    println!(
        "Rendered {} bars at {} BPM: {} callbacks, {} events, {} buffers",
        bars,
        clock.tempo(),
        summary.callbacks,
        summary.events,
        summary.buffers
    );
    if !summary.spawned.is_empty() {
        println!("Spawned: {}", summary.spawned.join(", "));
    }

    let frames_per_callback = driver.callback_frames();
    for (block, events) in sink.callbacks().enumerate() {
        for event in events {
            let frame = block as i64 * frames_per_callback + event.offset;
            println!("{:>10}  port {}  {:02X?}", frame, event.port, event.message.as_bytes());
        }
    }
    Ok(())
}

async fn play(options: Options, seconds: Option<f64>) -> Result<()> {
    let waker = Arc::new(Notify::new());
    let clock = Arc::new(options.config.to_clock()?.with_waker(Arc::clone(&waker)));
    let scheduler = build(&options.config, &clock)?;

    if options.watch {
        let path = options
            .config_path
            .clone()
            .ok_or_else(|| anyhow!("--watch requires --config"))?;
        let watcher = ConfigWatcher::new(&path, None)?;
        let scheduler = Arc::clone(&scheduler);
        let clock = Arc::clone(&clock);
        std::thread::spawn(move || {
            while let Some(event) = watcher.recv() {
                match event {
                    ConfigEvent::Reloaded(config) => {
                        clock.set_tempo(config.tempo);
                        match config.signature() {
                            Ok(signature) => clock.set_signature(signature),
                            Err(e) => warn!("keeping time signature: {e:#}"),
                        }
                        match scheduler.reprepare_all(clock.as_ref()) {
                            Ok(()) => info!(tempo = clock.tempo(), "configuration applied"),
                            Err(e) => warn!("reprepare failed: {e}"),
                        }
                    }
                    ConfigEvent::Error(message) => warn!("{message}"),
                }
            }
        });
    }

    info!(
        bar_length_in_frames = clock.bar_length_in_frames()?,
        "playing demo pattern"
    );
    let summary = run_realtime(
        scheduler,
        clock,
        waker,
        Box::new(TracingSink::new()),
        RealtimeOptions {
            callback_frames: options.config.callback_frames,
            duration: seconds.map(Duration::from_secs_f64),
        },
    )
    .await?;
    println!(
        "Played {} callbacks, {} events",
        summary.callbacks, summary.events
    );
    Ok(())
}

fn optional_number(args: &[String], index: usize) -> Result<Option<f64>> {
    match args.get(index) {
        Some(value) if !value.starts_with("--") => value
            .parse::<f64>()
            .map(Some)
            .map_err(|_| anyhow!("Invalid number: {}", value)),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("barline - bar-buffered MIDI scheduler");
        println!("Run with --help for usage information");
        return Ok(());
    }

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let options = parse_options(&args[1..])?;
    init_tracing(&options.config.log_level);

    match args[1].as_str() {
        "--render" => {
            let bars = optional_number(&args, 2)?.unwrap_or(8.0);
            render(&options, bars)?;
        }
        "--play" => {
            let seconds = optional_number(&args, 2)?;
            play(options, seconds).await?;
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
