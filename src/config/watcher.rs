// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Hot reload of the engine configuration.
//!
//! Watches a configuration file (or a directory of them) and emits a
//! freshly parsed [`EngineConfig`] once edits settle, so tempo and
//! humanization can change without stopping playback.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::EngineConfig;

const DEFAULT_DEBOUNCE_MS: u64 = 500;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Events emitted by the config watcher
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// A configuration file changed and parsed cleanly
    Reloaded(Box<EngineConfig>),
    /// A configuration file changed but could not be loaded
    Error(String),
}

/// Debounced watcher producing [`ConfigEvent`]s
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    event_receiver: Receiver<ConfigEvent>,
    watched_path: PathBuf,
}

impl ConfigWatcher {
    /// Watch `path` (file or directory), reloading once no further
    /// modification has arrived for `debounce_ms` (default 500 ms)
    pub fn new<P: AsRef<Path>>(path: P, debounce_ms: Option<u64>) -> Result<Self> {
        let watched_path = path.as_ref().to_path_buf();
        let debounce = Duration::from_millis(debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS));

        let (event_tx, event_rx) = mpsc::channel();
        let (notify_tx, notify_rx): (Sender<Event>, Receiver<Event>) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            Config::default(),
        )
        .map_err(|e| anyhow!("Failed to create file watcher: {}", e))?;

        let mode = if watched_path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&watched_path, mode)
            .map_err(|e| anyhow!("Failed to watch path {:?}: {}", watched_path, e))?;

        let root = watched_path.clone();
        std::thread::spawn(move || debounce_loop(root, debounce, notify_rx, event_tx));

        Ok(Self {
            _watcher: watcher,
            event_receiver: event_rx,
            watched_path,
        })
    }

    /// Try to receive the next config event (non-blocking)
    pub fn try_recv(&self) -> Option<ConfigEvent> {
        self.event_receiver.try_recv().ok()
    }

    /// Receive all pending config events
    pub fn recv_all(&self) -> Vec<ConfigEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Block until the next config event is received
    pub fn recv(&self) -> Option<ConfigEvent> {
        self.event_receiver.recv().ok()
    }

    /// Wait up to `timeout` for the next config event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ConfigEvent> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    pub fn watched_path(&self) -> &Path {
        &self.watched_path
    }
}

fn debounce_loop(root: PathBuf, debounce: Duration, notify_rx: Receiver<Event>, event_tx: Sender<ConfigEvent>) {
    let mut last_event_time: Option<Instant> = None;
    let mut pending_paths: Vec<PathBuf> = Vec::new();

    loop {
        match notify_rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    for path in event.paths {
                        if is_config_file(&path, &root) && !pending_paths.contains(&path) {
                            pending_paths.push(path);
                        }
                    }
                    last_event_time = Some(Instant::now());
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                let settled = last_event_time.is_some_and(|t| t.elapsed() >= debounce);
                if !settled {
                    continue;
                }
                for path in pending_paths.drain(..) {
                    let event = match validate_config(&path) {
                        Ok(config) => {
                            debug!(path = ?path, "configuration reloaded");
                            ConfigEvent::Reloaded(Box::new(config))
                        }
                        Err(e) => {
                            warn!(path = ?path, error = %e, "configuration reload failed");
                            ConfigEvent::Error(format!("Failed to load {:?}: {:#}", path, e))
                        }
                    };
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
                last_event_time = None;
            }
            // Watcher dropped
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn is_config_file(path: &Path, root: &Path) -> bool {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml" | "toml") => true,
        Some(_) => false,
        None => path == root,
    }
}

/// Load and validate a configuration without applying it
pub fn validate_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    EngineConfig::load(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_validate_config() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("engine.yaml");
        fs::write(&file_path, "tempo: 128\nbuffer_depth: 3\n").unwrap();

        let config = validate_config(&file_path).unwrap();
        assert_eq!(config.tempo, 128.0);
        assert_eq!(config.buffer_depth, 3);
    }

    #[test]
    fn test_validate_invalid_config() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("invalid.yaml");
        fs::write(&file_path, "this is not valid yaml: [").unwrap();
        assert!(validate_config(&file_path).is_err());

        let file_path = dir.path().join("zero_depth.toml");
        fs::write(&file_path, "buffer_depth = 0\n").unwrap();
        assert!(validate_config(&file_path).is_err());
    }

    #[test]
    fn test_is_config_file() {
        let root = Path::new("/tmp/engine");
        assert!(is_config_file(Path::new("/tmp/engine/a.yaml"), root));
        assert!(is_config_file(Path::new("/tmp/engine/a.yml"), root));
        assert!(is_config_file(Path::new("/tmp/engine/a.toml"), root));
        assert!(!is_config_file(Path::new("/tmp/engine/a.txt"), root));
        assert!(is_config_file(root, root));
        assert!(!is_config_file(Path::new("/tmp/engine/README"), root));
    }

    #[test]
    fn test_watcher_creation() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("engine.yaml"), "tempo: 100\n").unwrap();

        let watcher = ConfigWatcher::new(dir.path(), Some(100)).unwrap();
        assert_eq!(watcher.watched_path(), dir.path());
        assert!(watcher.try_recv().is_none());
    }

    #[test]
    fn test_watcher_detects_changes() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("engine.yaml");
        fs::write(&file_path, "tempo: 120\n").unwrap();

        let watcher = ConfigWatcher::new(dir.path(), Some(100)).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut file = fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&file_path)
            .unwrap();
        file.write_all(b"tempo: 140\n").unwrap();
        file.flush().unwrap();
        drop(file);

        // The truncate and the write may surface as separate changes, so
        // an event for the empty file can come first.
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut tempo = None;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match watcher.recv_timeout(remaining) {
                Some(ConfigEvent::Reloaded(config)) if config.tempo == 140.0 => {
                    tempo = Some(config.tempo);
                    break;
                }
                Some(_) => continue,
                None => break,
            }
        }

        assert_eq!(tempo, Some(140.0), "no reload with the new tempo within 5 s");
    }
}
