//! Tool configuration and on-disk state layout
//!
//! goweave owns no flags of its own: everything after the program name
//! belongs to the wrapped build driver, so tool behavior is driven by
//! `GOWEAVE_*` environment variables. All intermediate state lives under
//! a `.goweave` directory in the working directory.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, WeaveError};

/// State directory name, created in the working directory.
pub const STATE_DIR: &str = ".goweave";

/// Captured stderr of the dry build.
pub const DRY_RUN_LOG: &str = "dry_run.log";

/// Persisted rule bundles consumed by the toolexec stage.
pub const RULE_BUNDLES_FILE: &str = "rule_bundles.json";

/// Runtime configuration read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Keep all modified artifacts, skip restoration, disable optimizations
    /// in the final build.
    pub debug: bool,
    /// Raise the default log level to debug.
    pub verbose: bool,
    /// Override for the local probe package cache.
    pkg_cache: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            debug: env_flag("GOWEAVE_DEBUG"),
            verbose: env_flag("GOWEAVE_VERBOSE"),
            pkg_cache: env::var_os("GOWEAVE_PKG_CACHE").map(PathBuf::from),
        }
    }

    /// Resolve the local probe package cache to an absolute path.
    ///
    /// Manifest replace directives forbid relative paths, so the result is
    /// always absolute. The default cache lives inside the state dir and is
    /// created on demand; an explicit override must already exist.
    pub fn pkg_cache_dir(&self, state: &StateDir) -> Result<PathBuf> {
        match &self.pkg_cache {
            Some(dir) => {
                if !dir.is_dir() {
                    return Err(WeaveError::Preprocess(format!(
                        "package cache {} does not exist",
                        dir.display()
                    )));
                }
                fs::canonicalize(dir).map_err(|e| WeaveError::file_io("resolve", dir, e))
            }
            None => {
                let dir = state.root().join("pkg");
                ensure_dir(&dir)?;
                fs::canonicalize(&dir).map_err(|e| WeaveError::file_io("resolve", &dir, e))
            }
        }
    }
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("on")
    )
}

/// Layout of the tool's state directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    /// Open (and create) the state directory under `base`.
    pub fn open(base: &Path) -> Result<Self> {
        let root = base.join(STATE_DIR);
        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dry_run_log(&self) -> PathBuf {
        self.root.join(DRY_RUN_LOG)
    }

    pub fn rule_bundles(&self) -> PathBuf {
        self.root.join(RULE_BUNDLES_FILE)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Debug-mode snapshots of modified originals.
    pub fn changed_dir(&self) -> PathBuf {
        self.root.join("changed")
    }

    /// Isolated build cache for instrumented builds, so repeated preprocess
    /// runs never share objects with ordinary user builds.
    pub fn gocache_dir(&self) -> Result<PathBuf> {
        let dir = self.root.join("gocache");
        ensure_dir(&dir)?;
        fs::canonicalize(&dir).map_err(|e| WeaveError::file_io("resolve", &dir, e))
    }
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| WeaveError::file_io("mkdir", dir, e))
}
