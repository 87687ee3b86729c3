//! Build-argv interpretation
//!
//! goweave is installed as a drop-in front-end for the Go build driver:
//! `goweave go build ./...`. Everything after the program name is the
//! user's own command line, so classification is positional, not flag
//! parsing. Unrelated subcommands pass through to the driver untouched.

use std::env;

use tracing::debug;

use crate::error::{Result, WeaveError};
use crate::process::Cmd;

/// Build verbs that trigger instrumentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Build,
    Install,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Build => "build",
            Verb::Install => "install",
        }
    }

    fn parse(arg: &str) -> Option<Self> {
        match arg {
            "build" => Some(Verb::Build),
            "install" => Some(Verb::Install),
            _ => None,
        }
    }
}

/// The captured build command: driver path, verb, and the remaining
/// flags/targets exactly as the user wrote them.
#[derive(Debug, Clone)]
pub struct BuildInvocation {
    pub driver: String,
    pub verb: Verb,
    pub rest: Vec<String>,
}

impl BuildInvocation {
    /// Reassemble a driver argv with extra flags spliced in after the verb,
    /// preserving the user's remaining arguments.
    pub fn argv_with<'a, I>(&'a self, flags: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut argv = vec![self.driver.clone(), self.verb.as_str().to_string()];
        argv.extend(flags.into_iter().map(str::to_string));
        argv.extend(self.rest.iter().cloned());
        argv
    }

    /// Positional arguments (targets), i.e. trailing non-flag words.
    pub fn positional(&self) -> Vec<&str> {
        let mut targets = Vec::new();
        for arg in self.rest.iter().rev() {
            if arg.starts_with('-') {
                break;
            }
            targets.push(arg.as_str());
        }
        targets.reverse();
        targets
    }
}

/// How this process was invoked.
#[derive(Debug)]
pub enum Invocation {
    /// Too short or not aimed at the driver; print version and exit 0.
    Version,
    /// A driver subcommand we do not instrument; exec it verbatim.
    PassThrough(Vec<String>),
    /// A build or install to instrument.
    Build(BuildInvocation),
}

/// Fail fast when the environment forbids module-aware builds.
pub fn precheck() -> Result<()> {
    if env::var("GO111MODULE").ok().as_deref() == Some("off") {
        return Err(WeaveError::NotModularized("GO111MODULE is off".into()));
    }
    Ok(())
}

/// Classify the process argv (including the program name at index 0).
pub fn classify(argv: &[String]) -> Invocation {
    if argv.len() < 3 {
        return Invocation::Version;
    }
    if !argv[1].contains("go") {
        return Invocation::Version;
    }
    match Verb::parse(&argv[2]) {
        Some(verb) => Invocation::Build(BuildInvocation {
            driver: argv[1].clone(),
            verb,
            rest: argv[3..].to_vec(),
        }),
        None => Invocation::PassThrough(argv[1..].to_vec()),
    }
}

/// Exec the original driver command, surfacing its output and exit code.
pub fn pass_through(argv: &[String]) -> Result<i32> {
    debug!("pass-through: {:?}", argv);
    let status = Cmd::new(&argv[0]).args(argv[1..].to_vec()).run_streamed()?;
    Ok(status.code().unwrap_or(1))
}

pub fn print_version() {
    println!("goweave version {}", env!("CARGO_PKG_VERSION"));
}

/// Sanity check before re-invoking the driver: a reassembled argv must
/// still start with `<driver> build|install`.
pub fn assert_build_argv(argv: &[String]) {
    debug_assert!(argv.len() >= 2, "argv too short: {argv:?}");
    debug_assert!(argv[0].contains("go"), "not a driver argv: {argv:?}");
    debug_assert!(
        argv[1] == "build" || argv[1] == "install",
        "not a build argv: {argv:?}"
    );
}
