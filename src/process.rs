//! Subprocess execution with captured output
//!
//! All driver invocations except the final instrumented build go through
//! `run_captured`, so failures always carry the command line and combined
//! output for error reporting. The final build streams to the user.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

use crate::error::{Result, WeaveError};

/// Builder for a driver subprocess.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Targeted addition to the inherited environment.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// The command line as shown in logs and errors.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run the command and return its combined stdout and stderr.
    ///
    /// A non-zero exit becomes `Subprocess` with the captured output; a
    /// launch failure becomes `RunCmd`.
    pub fn run_captured(self) -> Result<String> {
        let line = self.command_line();
        debug!("run: {}", line);
        let output = self.build().output().map_err(|e| WeaveError::RunCmd {
            command: line.clone(),
            source: e,
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(WeaveError::Subprocess {
                command: line,
                output: combined,
            });
        }
        Ok(combined)
    }

    /// Run the command and return stdout alone; diagnostics on stderr are
    /// kept out of the result but still reported in the failure output.
    /// Used for `list -json`, whose stdout must stay machine-parsable.
    pub fn run_stdout(self) -> Result<String> {
        let line = self.command_line();
        debug!("run: {}", line);
        let output = self.build().output().map_err(|e| WeaveError::RunCmd {
            command: line.clone(),
            source: e,
        })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(WeaveError::Subprocess {
                command: line,
                output: combined,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run the command with inherited stdio and return its exit status.
    ///
    /// Used for pass-through invocations and the final build, whose output
    /// belongs to the user.
    pub fn run_streamed(self) -> Result<ExitStatus> {
        let line = self.command_line();
        debug!("run (streamed): {}", line);
        self.build()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| WeaveError::RunCmd {
                command: line,
                source: e,
            })
    }
}
