//! Position Store
//!
//! Keyed-by-position-id persistence for ledgers, position snapshots,
//! baselines and valuation history.
//!
//! Key features:
//! - JSON files under `<data_dir>/positions/<id>/`
//! - Atomic replace: write to a temp file, then rename
//! - Per-position single-flight lock (`.lock`, created exclusively); a
//!   lock whose owner died or that outlived the TTL is taken over
//! - In-memory implementation for tests and dry runs

use crate::error::{TrackerError, TrackerResult};
use crate::fees::FeeLedger;
use crate::types::{Baseline, PositionState, ValuationSnapshot};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

const LEDGER_FILE: &str = "ledger.json";
const POSITION_FILE: &str = "position.json";
const BASELINE_FILE: &str = "baseline.json";
const HISTORY_FILE: &str = "history.json";
const LOCK_FILE: &str = ".lock";

/// A lock file older than this is treated as left behind by a killed run
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

static LOCK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persistence for everything keyed by position id
pub trait PositionStore: Send + Sync {
    fn load_ledger(&self, position_id: u64) -> TrackerResult<Option<FeeLedger>>;
    fn save_ledger(&self, position_id: u64, ledger: &FeeLedger) -> TrackerResult<()>;

    fn load_position(&self, position_id: u64) -> TrackerResult<Option<PositionState>>;
    fn save_position(&self, position: &PositionState) -> TrackerResult<()>;

    /// `ConfigMissing` when no baseline was ever recorded
    fn load_baseline(&self, position_id: u64) -> TrackerResult<Baseline>;
    fn save_baseline(&self, position_id: u64, baseline: &Baseline) -> TrackerResult<()>;

    /// Oldest first; empty when nothing was recorded
    fn load_history(&self, position_id: u64) -> TrackerResult<Vec<ValuationSnapshot>>;
    fn save_history(&self, position_id: u64, history: &[ValuationSnapshot]) -> TrackerResult<()>;

    /// Single-flight guard; fails fast when a sync for the position is running
    fn lock(&self, position_id: u64) -> TrackerResult<PositionLock>;
}

/// Held for the duration of one position's sync; released on drop
#[derive(Debug)]
pub struct PositionLock {
    release: LockRelease,
}

#[derive(Debug)]
enum LockRelease {
    /// Lock file path and the token written into it
    File { path: PathBuf, token: String },
    Memory(Arc<Mutex<HashSet<u64>>>, u64),
}

impl Drop for PositionLock {
    fn drop(&mut self) {
        match &self.release {
            LockRelease::File { path, token } => match std::fs::read_to_string(path) {
                Ok(contents) if contents.trim() == token => {
                    if let Err(e) = std::fs::remove_file(path) {
                        warn!("Failed to remove lock {}: {}", path.display(), e);
                    }
                }
                Ok(_) => warn!("Lock {} was taken over, leaving it in place", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to read lock {}: {}", path.display(), e),
            },
            LockRelease::Memory(held, id) => {
                if let Ok(mut held) = held.lock() {
                    held.remove(id);
                }
            }
        }
    }
}

/// `<pid> <nanos>-<seq>`, unique per acquisition
fn lock_token() -> String {
    format!(
        "{} {}-{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        LOCK_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// no cheap liveness probe elsewhere; the TTL still applies
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn already_running(position_id: u64) -> TrackerError {
    TrackerError::Store(format!("sync already in progress for position {}", position_id))
}

// ── JSON file store ───────────────────────────────────────────────────

/// `<data_dir>/positions/<id>/{ledger,position,baseline,history}.json`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
    lock_ttl: Duration,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            root: data_dir.as_ref().join("positions"),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    fn dir(&self, position_id: u64) -> PathBuf {
        self.root.join(position_id.to_string())
    }

    fn path(&self, position_id: u64, file: &str) -> PathBuf {
        self.dir(position_id).join(file)
    }

    fn read<T: DeserializeOwned>(&self, path: &Path) -> TrackerResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| TrackerError::Store(format!("read {}: {}", path.display(), e)))?;
        let value = serde_json::from_str(&json)
            .map_err(|e| TrackerError::Store(format!("parse {}: {}", path.display(), e)))?;
        Ok(Some(value))
    }

    /// Write to temp file first, then rename (atomic)
    fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> TrackerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(value)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &json)
            .map_err(|e| TrackerError::Store(format!("write {}: {}", temp_path.display(), e)))?;
        std::fs::rename(&temp_path, path)
            .map_err(|e| TrackerError::Store(format!("rename {}: {}", path.display(), e)))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Contents of the lock at `path` and why it is stale, or `None` while it is held.
    ///
    /// Stale means older than the TTL, or (on Linux) owned by a pid that no
    /// longer exists. An unreadable or pid-less lock younger than the TTL is held.
    fn stale_lock(&self, path: &Path) -> Option<(String, String)> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Some((String::new(), "released meanwhile".into()))
            }
            Err(_) => return None,
        };
        let age = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        if let Some(age) = age {
            if age >= self.lock_ttl {
                return Some((contents, format!("held for {}s", age.as_secs())));
            }
        }
        let pid = contents
            .split_whitespace()
            .next()
            .and_then(|pid| pid.parse::<u32>().ok())?;
        if process_alive(pid) {
            return None;
        }
        Some((contents, format!("owner pid {} is gone", pid)))
    }
}

/// Removes the lock at `path` unless another run replaced it since it was read
fn remove_lock_if_unchanged(path: &Path, expected: &str) -> TrackerResult<()> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents == expected => match std::fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        },
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl PositionStore for JsonFileStore {
    fn load_ledger(&self, position_id: u64) -> TrackerResult<Option<FeeLedger>> {
        self.read(&self.path(position_id, LEDGER_FILE))
    }

    fn save_ledger(&self, position_id: u64, ledger: &FeeLedger) -> TrackerResult<()> {
        self.write(&self.path(position_id, LEDGER_FILE), ledger)
    }

    fn load_position(&self, position_id: u64) -> TrackerResult<Option<PositionState>> {
        self.read(&self.path(position_id, POSITION_FILE))
    }

    fn save_position(&self, position: &PositionState) -> TrackerResult<()> {
        self.write(&self.path(position.position_id, POSITION_FILE), position)
    }

    fn load_baseline(&self, position_id: u64) -> TrackerResult<Baseline> {
        self.read(&self.path(position_id, BASELINE_FILE))?
            .ok_or(TrackerError::ConfigMissing(position_id))
    }

    fn save_baseline(&self, position_id: u64, baseline: &Baseline) -> TrackerResult<()> {
        self.write(&self.path(position_id, BASELINE_FILE), baseline)
    }

    fn load_history(&self, position_id: u64) -> TrackerResult<Vec<ValuationSnapshot>> {
        Ok(self
            .read(&self.path(position_id, HISTORY_FILE))?
            .unwrap_or_default())
    }

    fn save_history(&self, position_id: u64, history: &[ValuationSnapshot]) -> TrackerResult<()> {
        self.write(&self.path(position_id, HISTORY_FILE), history)
    }

    fn lock(&self, position_id: u64) -> TrackerResult<PositionLock> {
        let dir = self.dir(position_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(LOCK_FILE);
        let mut took_over = false;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    let token = lock_token();
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        drop(file);
                        std::fs::remove_file(&path).ok();
                        return Err(e.into());
                    }
                    return Ok(PositionLock {
                        release: LockRelease::File { path, token },
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if took_over {
                        return Err(already_running(position_id));
                    }
                    let Some((contents, reason)) = self.stale_lock(&path) else {
                        return Err(already_running(position_id));
                    };
                    warn!(
                        "Position {}: taking over stale lock {} ({})",
                        position_id,
                        path.display(),
                        reason
                    );
                    remove_lock_if_unchanged(&path, &contents)?;
                    took_over = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// ── In-memory store ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    ledgers: HashMap<u64, FeeLedger>,
    positions: HashMap<u64, PositionState>,
    baselines: HashMap<u64, Baseline>,
    histories: HashMap<u64, Vec<ValuationSnapshot>>,
}

/// Non-persistent store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    locks: Arc<Mutex<HashSet<u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> TrackerResult<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TrackerError::Store("memory store poisoned".into()))?;
        Ok(f(&mut state))
    }
}

impl PositionStore for MemoryStore {
    fn load_ledger(&self, position_id: u64) -> TrackerResult<Option<FeeLedger>> {
        self.with_state(|s| s.ledgers.get(&position_id).cloned())
    }

    fn save_ledger(&self, position_id: u64, ledger: &FeeLedger) -> TrackerResult<()> {
        self.with_state(|s| {
            s.ledgers.insert(position_id, ledger.clone());
        })
    }

    fn load_position(&self, position_id: u64) -> TrackerResult<Option<PositionState>> {
        self.with_state(|s| s.positions.get(&position_id).cloned())
    }

    fn save_position(&self, position: &PositionState) -> TrackerResult<()> {
        self.with_state(|s| {
            s.positions.insert(position.position_id, position.clone());
        })
    }

    fn load_baseline(&self, position_id: u64) -> TrackerResult<Baseline> {
        self.with_state(|s| s.baselines.get(&position_id).cloned())?
            .ok_or(TrackerError::ConfigMissing(position_id))
    }

    fn save_baseline(&self, position_id: u64, baseline: &Baseline) -> TrackerResult<()> {
        self.with_state(|s| {
            s.baselines.insert(position_id, baseline.clone());
        })
    }

    fn load_history(&self, position_id: u64) -> TrackerResult<Vec<ValuationSnapshot>> {
        self.with_state(|s| s.histories.get(&position_id).cloned().unwrap_or_default())
    }

    fn save_history(&self, position_id: u64, history: &[ValuationSnapshot]) -> TrackerResult<()> {
        self.with_state(|s| {
            s.histories.insert(position_id, history.to_vec());
        })
    }

    fn lock(&self, position_id: u64) -> TrackerResult<PositionLock> {
        let mut held = self
            .locks
            .lock()
            .map_err(|_| TrackerError::Store("lock table poisoned".into()))?;
        if !held.insert(position_id) {
            return Err(already_running(position_id));
        }
        Ok(PositionLock {
            release: LockRelease::Memory(self.locks.clone(), position_id),
        })
    }
}
