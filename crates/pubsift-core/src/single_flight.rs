//! Keyed single-flight guard: at most one active run per partition or source key.
//!
//! Keys are claimed in-process with a `Mutex<HashSet>`. With a lock directory,
//! each claim also creates `{dir}/{key}.lock` exclusively, so concurrent
//! processes sharing the directory skip each other's keys. A lock file whose
//! recorded process is gone is taken over.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Set of keys currently being worked on.
#[derive(Default)]
pub struct SingleFlight {
    active: Mutex<HashSet<String>>,
    lock_dir: Option<PathBuf>,
}

/// RAII guard that releases its key on drop.
pub struct FlightGuard<'a> {
    owner: &'a SingleFlight,
    key: String,
    lock_file: Option<PathBuf>,
}

impl SingleFlight {
    /// Guard scoped to this process.
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard shared by every process using `dir`.
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            active: Mutex::default(),
            lock_dir: Some(dir.into()),
        }
    }

    /// Claim `key` if nobody holds it; `None` means a conflicting run is active.
    pub fn try_acquire(&self, key: &str) -> Option<FlightGuard<'_>> {
        let mut active = self.active.lock().expect("single-flight lock poisoned");
        if active.contains(key) {
            return None;
        }

        let lock_file = match &self.lock_dir {
            None => None,
            Some(dir) => {
                let path = lock_path(dir, key);
                match claim_file(&path) {
                    Ok(true) => Some(path),
                    Ok(false) => return None,
                    Err(e) => {
                        log::warn!("{}: {e}, not claimed", path.display());
                        return None;
                    }
                }
            }
        };

        active.insert(key.to_string());
        Some(FlightGuard {
            owner: self,
            key: key.to_string(),
            lock_file,
        })
    }

    /// Whether `key` is held by this process or, with a lock directory, any other.
    pub fn is_active(&self, key: &str) -> bool {
        let held = self
            .active
            .lock()
            .expect("single-flight lock poisoned")
            .contains(key);
        held || self.lock_dir.as_ref().is_some_and(|dir| lock_path(dir, key).exists())
    }
}

impl FlightGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // Release even when a worker panicked while holding the key
        let mut active = match self.owner.active.lock() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(path) = &self.lock_file {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("{}: {e}", path.display());
            }
        }
        active.remove(&self.key);
    }
}

fn lock_path(dir: &Path, key: &str) -> PathBuf {
    let name: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    dir.join(format!("{name}.lock"))
}

/// Create `path` exclusively, recording our pid. `Ok(false)` when a live
/// process holds it.
fn claim_file(path: &Path) -> io::Result<bool> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    for attempt in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                write!(file, "{}", std::process::id())?;
                return Ok(true);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                if attempt > 0 || holder_alive(holder.trim()) {
                    return Ok(false);
                }
                log::warn!("{}: holder {} is gone, taking over", path.display(), holder.trim());
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}

/// Liveness of the process recorded in a lock file. Without `/proc` every
/// holder counts as alive; an unreadable pid counts as alive too.
fn holder_alive(pid: &str) -> bool {
    let Ok(pid) = pid.parse::<u32>() else {
        return true;
    };
    let proc = Path::new("/proc");
    !proc.is_dir() || proc.join(pid.to_string()).exists()
}
