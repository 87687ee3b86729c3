//! Dry-build oracle
//!
//! Re-runs the original build with rebuild-all, print-commands, and
//! dry-run flags so the driver emits every compile command it would issue
//! without executing any. The commands land on stderr; we capture them to
//! `dry_run.log` and filter the compile invocations for the toolexec
//! stage. The first build of the convergence loop only succeeds if this
//! one does, so a broken module fails here with the driver's own
//! diagnostics.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::cli::{self, BuildInvocation};
use crate::config::StateDir;
use crate::error::{Result, WeaveError};

/// Compile command lines can exceed megabytes for large packages.
const LINE_BUFFER: usize = 10 * 1024 * 1024;

/// How much of the captured log to quote in a failure.
const FAILURE_TAIL: usize = 8 * 1024;

/// Run the dry build and return the ordered compile command list.
pub fn run(inv: &BuildInvocation, state: &StateDir) -> Result<Vec<String>> {
    let log_path = state.dry_run_log();
    let log = File::create(&log_path)
        .map_err(|e| WeaveError::file_io("create", &log_path, e))?;

    let argv = inv.argv_with(["-a", "-x", "-n"]);
    cli::assert_build_argv(&argv);
    info!("run dry build: {:?}", argv);

    // Build errors surface on stdout here; only the command trace goes to
    // stderr. The dry build must run from the same directory as the
    // original command, so no cwd is set.
    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .stdout(Stdio::inherit())
        .stderr(log)
        .status()
        .map_err(|e| WeaveError::RunCmd {
            command: argv.join(" "),
            source: e,
        })?;
    if !status.success() {
        return Err(WeaveError::Subprocess {
            command: argv.join(" "),
            output: log_tail(&log_path),
        });
    }

    let commands = scan_compile_commands(&log_path)?;
    debug!("dry build yielded {} compile commands", commands.len());
    Ok(commands)
}

/// Whether a dry-run line is a compile invocation.
pub fn is_compile_command(line: &str) -> bool {
    line.contains("compile") && line.contains(" -o ") && line.contains(" -p ")
}

/// Scan the captured log, keeping trimmed compile commands in order.
pub fn scan_compile_commands(log_path: &Path) -> Result<Vec<String>> {
    let file =
        File::open(log_path).map_err(|e| WeaveError::file_io("open", log_path, e))?;
    let mut reader = BufReader::with_capacity(LINE_BUFFER, file);
    let mut commands = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|_| WeaveError::Parse("cannot parse dry run log".into()))?;
        if n == 0 {
            break;
        }
        if is_compile_command(&line) {
            commands.push(line.trim().to_string());
        }
    }
    Ok(commands)
}

fn log_tail(path: &Path) -> String {
    let text = std::fs::read_to_string(path).unwrap_or_default();
    match text.char_indices().nth_back(FAILURE_TAIL) {
        Some((idx, _)) => text[idx..].to_string(),
        None => text,
    }
}
