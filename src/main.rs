use std::env;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use goweave::cli::{self, Invocation};
use goweave::config::Config;
use goweave::error::WeaveError;
use goweave::{preprocess, toolexec};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let config = Config::from_env();
    init_logging(config.verbose);

    // Toolexec child invocations never take the preprocess path.
    if args.get(1).map(String::as_str) == Some(toolexec::REMIX_SUBCOMMAND) {
        // remix execs the tool command; reaching here means it failed.
        let err = toolexec::remix(&args[2..]).unwrap_err();
        return fail(&err);
    }

    if let Err(err) = cli::precheck() {
        return fail(&err);
    }

    match cli::classify(&args) {
        Invocation::Version => {
            cli::print_version();
            ExitCode::SUCCESS
        }
        Invocation::PassThrough(argv) => match cli::pass_through(&argv) {
            Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            Err(err) => fail(&err),
        },
        Invocation::Build(invocation) => match preprocess::run(invocation, config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => fail(&err),
        },
    }
}

fn fail(err: &WeaveError) -> ExitCode {
    eprintln!("goweave: {err}");
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "goweave=debug" } else { "goweave=info" };
    let filter =
        EnvFilter::try_from_env("GOWEAVE_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}
