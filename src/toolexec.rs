//! Toolexec launch and the hook child entry
//!
//! The final build re-invokes the driver with `-toolexec` pointed back at
//! this executable under the `remix` subcommand, `-work` to keep the
//! temporary compilation directory, and `-a` so every unit passes through
//! the hook. The build runs against an isolated GOCACHE; sharing a cache
//! with ordinary user builds would serve stale, uninstrumented objects.

use std::env;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::cli::{self, BuildInvocation};
use crate::config::{Config, StateDir};
use crate::error::{Result, WeaveError};
use crate::process::Cmd;

/// Subcommand the driver invokes for every tool under `-toolexec`.
pub const REMIX_SUBCOMMAND: &str = "remix";

/// Run the instrumented build. Output streams to the user.
pub fn run_instrumented_build(
    inv: &BuildInvocation,
    config: &Config,
    state: &StateDir,
) -> Result<()> {
    let exe = env::current_exe()
        .map_err(|e| WeaveError::file_io("resolve", Path::new("goweave"), e))?;
    let toolexec = format!("-toolexec={} {}", exe.display(), REMIX_SUBCOMMAND);

    let mut flags = vec![toolexec.as_str(), "-work", "-a"];
    if config.debug {
        // Keep the binary debuggable: no inlining, no optimization.
        flags.push("-gcflags=all=-N -l");
    }
    let argv = inv.argv_with(flags);
    cli::assert_build_argv(&argv);

    let gocache = state.gocache_dir()?;
    info!("run toolexec build: {:?}", argv);
    info!("using isolated GOCACHE {}", gocache.display());

    let status = Cmd::new(&argv[0])
        .args(argv[1..].to_vec())
        .env("GOCACHE", gocache.to_string_lossy())
        .run_streamed()?;
    if !status.success() {
        return Err(WeaveError::Subprocess {
            command: argv.join(" "),
            output: "build output was streamed above".into(),
        });
    }
    Ok(())
}

/// Toolexec child entry: exec the received tool command unchanged,
/// preserving its exit status. The syntactic rewriting engine interposes
/// on compile commands here; everything else always passes through.
pub fn remix(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Err(WeaveError::Preprocess(
            "remix: missing tool command".into(),
        ));
    }
    let err = Command::new(&args[0]).args(&args[1..]).exec();
    // exec only returns on failure.
    Err(WeaveError::RunCmd {
        command: args.join(" "),
        source: err,
    })
}
