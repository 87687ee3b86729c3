//! Shared helpers: a throwaway Go module plus a scripted fake build
//! driver that answers `list -json`, `mod tidy`/`vendor`, dry builds,
//! and toolexec builds, logging every invocation it receives.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub const GO_MOD_TEXT: &str =
    "module example.com/app\n\ngo 1.22\n\nrequire example.com/dep v1.0.0\n";

pub const MAIN_GO_TEXT: &str = "package main\n\nfunc main() {\n\tprintln(\"hi\")\n}\n";

#[derive(Default)]
pub struct DriverOptions {
    /// `mod vendor` exits non-zero.
    pub fail_vendor: bool,
    /// `mod tidy` sleeps this long, for signal-delivery tests.
    pub tidy_sleep_secs: u32,
}

pub struct FakeBuild {
    pub root: TempDir,
    /// The Go module under build.
    pub mod_dir: PathBuf,
    /// The fake driver executable (its path ends in `go`).
    pub driver: PathBuf,
    /// One line per driver invocation.
    pub call_log: PathBuf,
    /// Probe package cache handed to goweave via GOWEAVE_PKG_CACHE.
    pub cache: PathBuf,
    /// go.mod as observed while the bootstrap file existed.
    pub manifest_snapshot: PathBuf,
    /// Bootstrap file as observed during `mod tidy`.
    pub bootstrap_snapshot: PathBuf,
    /// Touched when `mod tidy` sees the bootstrap file.
    pub bootstrap_marker: PathBuf,
}

impl FakeBuild {
    pub fn new(opts: DriverOptions) -> Self {
        let root = TempDir::new().expect("create tempdir");
        let mod_dir = root.path().join("app");
        fs::create_dir_all(&mod_dir).unwrap();
        fs::write(mod_dir.join("go.mod"), GO_MOD_TEXT).unwrap();
        fs::write(mod_dir.join("main.go"), MAIN_GO_TEXT).unwrap();

        let cache = root.path().join("cache");
        fs::create_dir_all(&cache).unwrap();

        let pkg_json = root.path().join("pkg.json");
        fs::write(
            &pkg_json,
            format!(
                "{{\"Dir\":{dir:?},\"Name\":\"main\",\"GoFiles\":[\"main.go\"],\"Module\":{{\"Path\":\"example.com/app\",\"GoMod\":{gomod:?}}}}}\n",
                dir = mod_dir.display().to_string(),
                gomod = mod_dir.join("go.mod").display().to_string(),
            ),
        )
        .unwrap();

        let bin = root.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let driver = bin.join("go");
        let call_log = root.path().join("driver_calls.log");
        let manifest_snapshot = root.path().join("go.mod.snapshot");
        let bootstrap_snapshot = root.path().join("otel_importer.snapshot");
        let bootstrap_marker = root.path().join("bootstrap.present");

        let vendor_hook = if opts.fail_vendor {
            "if [ \"$2\" = \"vendor\" ]; then echo 'vendor: unresolved dependency' 1>&2; exit 1; fi"
        } else {
            ":"
        };
        let tidy_hook = if opts.tidy_sleep_secs > 0 {
            format!(
                "if [ \"$2\" = \"tidy\" ]; then sleep {}; fi",
                opts.tidy_sleep_secs
            )
        } else {
            ":".to_string()
        };

        let script = format!(
            r#"#!/bin/sh
echo "$@" >> "{log}"
echo "gocache=$GOCACHE" >> "{log}"
case "$1" in
  version)
    echo "go version go1.22.0 fake/amd64"
    exit 0
    ;;
  boom)
    exit 7
    ;;
  list)
    cat "{pkg_json}"
    exit 0
    ;;
  mod)
    if [ -f "{importer}" ]; then
      touch "{marker}"
      cp "{gomod}" "{mod_snapshot}"
      cp "{importer}" "{imp_snapshot}"
    fi
    {vendor_hook}
    {tidy_hook}
    exit 0
    ;;
  build|install)
    for a in "$@"; do
      if [ "$a" = "-n" ]; then
        echo '/opt/go/pkg/tool/linux_amd64/compile -o $WORK/b002/_pkg_.a -p example.com/dep dep.go' 1>&2
        echo '/opt/go/pkg/tool/linux_amd64/compile -o $WORK/b001/_pkg_.a -p main main.go' 1>&2
        exit 0
      fi
    done
    exit 0
    ;;
esac
exit 0
"#,
            log = call_log.display(),
            pkg_json = pkg_json.display(),
            importer = mod_dir.join("otel_importer.go").display(),
            marker = bootstrap_marker.display(),
            gomod = mod_dir.join("go.mod").display(),
            mod_snapshot = manifest_snapshot.display(),
            imp_snapshot = bootstrap_snapshot.display(),
        );
        fs::write(&driver, script).unwrap();
        fs::set_permissions(&driver, fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            root,
            mod_dir,
            driver,
            call_log,
            cache,
            manifest_snapshot,
            bootstrap_snapshot,
            bootstrap_marker,
        }
    }

    /// Drop a rule corpus into the package cache.
    pub fn write_corpus(&self, json: &str) {
        fs::write(self.cache.join("rules.json"), json).unwrap();
    }

    pub fn go_mod(&self) -> String {
        fs::read_to_string(self.mod_dir.join("go.mod")).unwrap()
    }

    pub fn bootstrap_path(&self) -> PathBuf {
        self.mod_dir.join("otel_importer.go")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.mod_dir.join(".goweave")
    }

    pub fn driver_calls(&self) -> String {
        fs::read_to_string(&self.call_log).unwrap_or_default()
    }
}

/// A goweave command wired to the fake build: cwd inside the module,
/// package cache pointed at the fixture, modules enabled.
pub fn goweave(fb: &FakeBuild) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(goweave_bin());
    cmd.current_dir(&fb.mod_dir)
        .env("GO111MODULE", "on")
        .env("GOWEAVE_PKG_CACHE", &fb.cache)
        .env_remove("GOWEAVE_DEBUG")
        .env_remove("GOWEAVE_VERBOSE");
    cmd
}

pub fn goweave_bin() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_goweave"))
}
