use clap::Parser;
use pgtypegen::config::{Defaults, Options, PartialOptions, Resolved};
use pgtypegen::error::{Error, GitError};
use pgtypegen::log::CONFIG;
use pgtypegen::{log, Args, Generator, VERSION};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let partial = match PartialOptions::load(&args.config_file_path) {
        Ok(partial) => partial.overlay(args.to_partial_options()),
        Err(err) => {
            eprintln!("Configuration Error: {}", err);
            std::process::exit(exitcode::CONFIG);
        }
    };

    let Resolved {
        mut options,
        warnings,
    } = match Options::resolve(partial, &Defaults::default()) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("Configuration Error: {}", err);
            std::process::exit(exitcode::CONFIG);
        }
    };

    args.apply_log_flags(&mut options.log);
    log::init(options.log.clone());
    info!(target: CONFIG, msg = "pgtypegen", version = VERSION);

    for warning in &warnings {
        options.logger.warn(warning);
    }
    debug!(target: CONFIG, ?options);

    let generator = Generator::new(options);

    let cancel = generator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(msg = "Received SIGINT");
            cancel.cancel();
        }
    });

    match generator.run().await {
        Ok(report) => {
            println!("{report}");
            if report.has_failures() {
                std::process::exit(exitcode::DATAERR);
            }
        }
        Err(err) => {
            error!(msg = "Generation failed", error = err.to_string());
            eprintln!("{err}");
            std::process::exit(exit_code(&err));
        }
    }
}

fn exit_code(err: &Error) -> exitcode::ExitCode {
    match err {
        Error::Config(_) => exitcode::CONFIG,
        Error::Catalog(_) | Error::ConnectionTimeout(_) | Error::DatabaseConnection { .. } => {
            exitcode::UNAVAILABLE
        }
        Error::Git(GitError::Dirty { .. }) | Error::Cancelled => exitcode::TEMPFAIL,
        Error::Describe(_) | Error::Extract(_) | Error::Infer(_) | Error::Write(_) => {
            exitcode::DATAERR
        }
        Error::Git(_) | Error::Io(_) | Error::Task(_) => exitcode::IOERR,
    }
}
