//! Backup/restore warden
//!
//! Every component about to modify a tracked file registers it here
//! first. The ledger is the sole authority for restoration: first write
//! wins, and `restore_all` copies each backup back over its origin
//! byte-exact. The warden is cloned into the signal listener, so cleanup
//! runs on normal completion, on error, and on SIGINT/SIGTERM alike.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::config::{ensure_dir, StateDir};
use crate::error::{Result, WeaveError};

/// Suffix appended to backup copies.
pub const BACKUP_SUFFIX: &str = ".bk";

#[derive(Clone)]
pub struct Warden {
    ledger: Arc<Mutex<BTreeMap<PathBuf, PathBuf>>>,
    backups_dir: PathBuf,
    changed_dir: PathBuf,
}

impl Warden {
    pub fn new(state: &StateDir) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(BTreeMap::new())),
            backups_dir: state.backups_dir(),
            changed_dir: state.changed_dir(),
        }
    }

    /// Record `origin` before its first modification. Subsequent calls for
    /// the same path are no-ops.
    pub fn backup(&self, origin: &Path) -> Result<()> {
        let mut ledger = self.ledger.lock().expect("warden ledger poisoned");
        if ledger.contains_key(origin) {
            debug!("backup of {} already exists", origin.display());
            return Ok(());
        }
        ensure_dir(&self.backups_dir)?;
        let name = origin
            .file_name()
            .ok_or_else(|| {
                WeaveError::Preprocess(format!("cannot back up {}", origin.display()))
            })?
            .to_string_lossy();
        let backup = self.backups_dir.join(format!("{name}{BACKUP_SUFFIX}"));
        copy_file(origin, &backup)?;
        ledger.insert(origin.to_path_buf(), backup);
        info!("backed up {}", origin.display());
        Ok(())
    }

    /// Copy every backup back over its origin.
    pub fn restore_all(&self) -> Result<()> {
        let ledger = self.ledger.lock().expect("warden ledger poisoned");
        for (origin, backup) in ledger.iter() {
            copy_file(backup, origin)?;
            info!("restored {}", origin.display());
        }
        Ok(())
    }

    /// Debug-mode snapshot: copy each modified original plus any extra
    /// artifacts into `changed/` for post-mortem. Best effort.
    pub fn snapshot_changed(&self, extras: &[&Path]) {
        if ensure_dir(&self.changed_dir).is_err() {
            return;
        }
        let ledger = self.ledger.lock().expect("warden ledger poisoned");
        let originals = ledger.keys().map(PathBuf::as_path);
        for path in originals.chain(extras.iter().copied()) {
            let Some(name) = path.file_name() else {
                continue;
            };
            if let Err(err) = copy_file(path, &self.changed_dir.join(name)) {
                warn!("snapshot of {} failed: {}", path.display(), err);
            }
        }
    }

    pub fn tracked(&self) -> Vec<PathBuf> {
        self.ledger
            .lock()
            .expect("warden ledger poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    fs::copy(from, to)
        .map(drop)
        .map_err(|e| WeaveError::file_io("copy", from, e))
}
