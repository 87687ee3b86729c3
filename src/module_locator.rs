//! Target module discovery
//!
//! Resolves the module being built from the captured build argv, via two
//! strategies in fallback order: the driver's package resolver
//! (`list -json`), and a bare-source walk for invocations that pass raw
//! `.go` files. The located module is read-only for the rest of the run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::bootstrap::BOOTSTRAP_FILE;
use crate::cli::BuildInvocation;
use crate::error::{Result, WeaveError};
use crate::manifest::{self, Manifest};
use crate::process::Cmd;

/// Canonical vendor directory name beside the manifest.
pub const VENDOR_DIR: &str = "vendor";

/// The resolved main module. Created once during init, read-only after.
#[derive(Debug, Clone)]
pub struct GoModule {
    /// Declared module identity from the manifest.
    pub name: String,
    /// Absolute path of the manifest.
    pub manifest_path: PathBuf,
    /// Directory containing the manifest.
    pub root_dir: PathBuf,
    /// Directory holding the `main` entry function; the bootstrap file
    /// lives here.
    pub main_pkg_dir: PathBuf,
    /// Where the bootstrap source file will be written.
    pub bootstrap_path: PathBuf,
    /// Whether the build uses the vendor tree.
    pub vendored: bool,
}

/// One package as reported by the resolver (or synthesized).
#[derive(Debug, Clone)]
pub struct PackageRecord {
    pub name: String,
    pub go_files: Vec<PathBuf>,
    pub module: Option<ModuleRecord>,
    /// The resolver reported it could not load this package.
    pub broken: bool,
}

#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub path: String,
    pub go_mod: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct GoListPackage {
    name: String,
    dir: String,
    go_files: Vec<String>,
    module: Option<GoListModule>,
    // A `list -json` run can exit zero while still reporting individual
    // packages as unloadable, under either of these fields.
    error: Option<serde_json::Value>,
    errors: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct GoListModule {
    path: String,
    go_mod: String,
}

impl GoListPackage {
    fn into_record(self) -> PackageRecord {
        let dir = PathBuf::from(&self.dir);
        let go_files = self
            .go_files
            .into_iter()
            .map(|f| {
                let p = PathBuf::from(&f);
                // The resolver reports file names relative to Dir.
                if p.is_absolute() || self.dir.is_empty() {
                    p
                } else {
                    dir.join(p)
                }
            })
            .collect();
        let module = self.module.filter(|m| !m.path.is_empty()).map(|m| ModuleRecord {
            path: m.path,
            go_mod: PathBuf::from(m.go_mod),
        });
        PackageRecord {
            name: self.name,
            go_files,
            module,
            broken: self.error.is_some() || !self.errors.is_empty(),
        }
    }
}

/// Locate the module targeted by the build command. Bare-source builds may
/// append the bootstrap file to the invocation so the real build compiles
/// it alongside the user's files.
pub fn locate(inv: &mut BuildInvocation) -> Result<GoModule> {
    let pkgs = find_packages(inv)?;

    let mut name = String::new();
    let mut manifest_path: Option<PathBuf> = None;
    let mut bootstrap_path: Option<PathBuf> = None;

    for pkg in &pkgs {
        if pkg.go_files.is_empty() {
            continue;
        }
        if let Some(module) = &pkg.module {
            debug!("module {} via resolver", module.path);
            name = module.path.clone();
            manifest_path = Some(module.go_mod.clone());
            let main_dir = find_main_dir(&pkgs)?;
            bootstrap_path = Some(main_dir.join(BOOTSTRAP_FILE));
        } else if pkg.name == "main" {
            // Raw source files: the manifest sits somewhere above them.
            let gofile = &pkg.go_files[0];
            let file_dir = parent_dir(gofile)?;
            let gomod = manifest::find_upward(&file_dir)?;
            name = Manifest::parse(&gomod)?.module_path().to_string();
            manifest_path = Some(gomod);
            bootstrap_path = Some(bare_source_bootstrap(inv)?);
        }
    }

    let manifest_path = match manifest_path {
        Some(p) if !name.is_empty() => p,
        _ => {
            return Err(WeaveError::Preprocess(
                "cannot find compiled module".into(),
            ));
        }
    };
    let bootstrap_path = bootstrap_path.ok_or_else(|| {
        WeaveError::Preprocess(format!("cannot place {BOOTSTRAP_FILE} file"))
    })?;

    let root_dir = parent_dir(&manifest_path)?;
    let main_pkg_dir = parent_dir(&bootstrap_path)?;
    let vendored =
        !vendoring_disabled(&inv.rest) && root_dir.join(VENDOR_DIR).is_dir();

    Ok(GoModule {
        name,
        manifest_path,
        root_dir,
        main_pkg_dir,
        bootstrap_path,
        vendored,
    })
}

/// Resolve candidate packages from the positional build arguments, `.`
/// when none resolve. Load failures are tolerated only until the first
/// package resolves; after that the remaining arguments must be packages.
fn find_packages(inv: &BuildInvocation) -> Result<Vec<PackageRecord>> {
    let mut candidates = Vec::new();
    let mut found = false;

    for arg in inv.positional().into_iter().rev() {
        if is_test_source(arg) {
            // A lone test harness source compiles as its own main package.
            candidates.push(PackageRecord {
                name: "main".into(),
                go_files: vec![PathBuf::from(arg)],
                module: None,
                broken: false,
            });
            found = true;
            continue;
        }
        match load_packages(&inv.driver, arg) {
            Ok(pkgs) => {
                for pkg in pkgs {
                    if pkg.broken {
                        debug!("skipping broken package from {}", arg);
                        continue;
                    }
                    found = true;
                    candidates.push(pkg);
                }
            }
            Err(err) => {
                if found {
                    break;
                }
                debug!("cannot load package from {}: {}", arg, err);
            }
        }
    }

    if !found {
        for pkg in load_packages(&inv.driver, ".")? {
            if pkg.broken {
                debug!("skipping broken package from .");
                continue;
            }
            candidates.push(pkg);
        }
    }
    if candidates.is_empty() {
        return Err(WeaveError::Preprocess("no package found".into()));
    }
    Ok(candidates)
}

/// Query the resolver for one pattern. The output is a stream of
/// concatenated JSON objects, one per package.
fn load_packages(driver: &str, pattern: &str) -> Result<Vec<PackageRecord>> {
    let out = Cmd::new(driver)
        .args(["list", "-json", pattern])
        .run_stdout()?;
    let mut pkgs = Vec::new();
    for item in serde_json::Deserializer::from_str(&out).into_iter::<GoListPackage>() {
        pkgs.push(item?.into_record());
    }
    Ok(pkgs)
}

/// Directory of the source file declaring the top-level `main` entry.
fn find_main_dir(pkgs: &[PackageRecord]) -> Result<PathBuf> {
    for pkg in pkgs {
        for gofile in &pkg.go_files {
            if gofile.extension().is_none_or(|e| e != "go") {
                continue;
            }
            let src = fs::read_to_string(gofile)
                .map_err(|e| WeaveError::file_io("read", gofile, e))?;
            if declares_main(&src) {
                return parent_dir(gofile);
            }
        }
    }
    Err(WeaveError::Preprocess(
        "cannot find main function in the source files".into(),
    ))
}

/// Whether the source declares a top-level `func main`. Declarations sit
/// at column zero in formatted source; block comments are skipped.
fn declares_main(src: &str) -> bool {
    let mut in_block_comment = false;
    for line in src.lines() {
        if in_block_comment {
            if let Some(idx) = line.find("*/") {
                in_block_comment = false;
                if line[idx + 2..].trim_start().starts_with("func main(") {
                    return true;
                }
            }
            continue;
        }
        if line.starts_with("func main(") {
            return true;
        }
        if line.trim_start().starts_with("/*") && !line.contains("*/") {
            in_block_comment = true;
        }
    }
    false
}

/// Bootstrap placement for bare-source builds: beside the listed sources,
/// appended to the build argv unless already mentioned.
fn bare_source_bootstrap(inv: &mut BuildInvocation) -> Result<PathBuf> {
    if let Some(arg) = inv.rest.iter().find(|a| a.contains(BOOTSTRAP_FILE)) {
        return Ok(PathBuf::from(arg));
    }
    let last = inv.rest.last().cloned().ok_or_else(|| {
        WeaveError::Preprocess("no source files in build command".into())
    })?;
    let dir = Path::new(&last)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let bootstrap = dir.join(BOOTSTRAP_FILE);
    inv.rest.push(bootstrap.to_string_lossy().into_owned());
    Ok(bootstrap)
}

/// `test_*.go` positional arguments become a synthetic main package. The
/// whole argument must carry the prefix; a test source reached through a
/// directory path is loaded like any other package.
fn is_test_source(arg: &str) -> bool {
    arg.starts_with("test_") && arg.ends_with(".go")
}

/// `-mod=mod` and `-mod=readonly` tell the driver to ignore the vendor
/// directory regardless of filesystem state.
pub fn vendoring_disabled(rest: &[String]) -> bool {
    rest.iter()
        .any(|a| a.starts_with("-mod=mod") || a.starts_with("-mod=readonly"))
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    let dir = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => Path::new("."),
    };
    fs::canonicalize(dir).map_err(|e| WeaveError::file_io("resolve", dir, e))
}
