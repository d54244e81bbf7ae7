use std::process::ExitCode;

use clap::{ArgMatches, CommandFactory, FromArgMatches};
use commonstatus::{
    config::{self, Args, Config, LogLevel},
    httpd::{self, Server},
    telemetry::Lifetime,
};
use jemallocator::Jemalloc;
use tokio::{runtime::Builder, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("Failed to start the server: {0}")]
    Httpd(#[from] httpd::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

async fn inner_main(config: Config) -> Result<(), Error> {
    let server = Server::bind(&config, Lifetime::new()).await?;

    server
        .run(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("received ctrl-c"),
                Err(e) => {
                    error!("unable to listen for ctrl-c, running until killed: {e}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;
    Ok(())
}

fn run(matches: &ArgMatches, args: Args) -> Result<(), Error> {
    for setting in config::defaulted_settings(matches) {
        warn!("{setting} is not set, using the default value");
    }
    let config = Config::try_from(args)?;

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    runtime.block_on(inner_main(config))
}

fn main() -> ExitCode {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());

    // RUST_LOG, when set, wins over the configured level.
    let log_level = args.log_level.parse::<LogLevel>();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(log_level.as_ref().copied().unwrap_or_default().as_directive())
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting commonstatus-exporter {version}.");
    if let Err(e) = &log_level {
        warn!("{e}, using INFO");
    }

    let res = run(&matches, args);
    info!("Bye. :)");
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
