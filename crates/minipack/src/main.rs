use std::{path::PathBuf, process::ExitCode};

use anyhow::{Result, anyhow};
use clap::{ArgAction, Parser};
use log::{LevelFilter, debug, error, info};
use minipack::{
    config::{Config, ConfigLayer},
    emitter::Destination,
    error::BundleError,
    orchestrator::{self, BundleOrchestrator},
};

/// Bundle an entry file and everything it imports into one program
#[derive(Parser, Debug)]
#[command(name = "minipack", version, about)]
struct Cli {
    /// Entry file to start discovery from
    #[arg(short, long)]
    entry: Option<PathBuf>,

    /// File to write the bundle to
    #[arg(short, long, conflicts_with = "stdout")]
    output: Option<PathBuf>,

    /// Write the bundle to standard output
    #[arg(long)]
    stdout: bool,

    /// Load each file once and reuse its id for every import of it
    #[arg(long)]
    dedupe: bool,

    /// Cache module instances in the emitted runtime
    #[arg(long)]
    memoize: bool,

    /// Abort once the graph exceeds this many units (0 = unlimited)
    #[arg(long, value_name = "N")]
    max_units: Option<usize>,

    /// Number of loader threads
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Config file to use instead of ./minipack.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Also write the discovered unit graph as JSON
    #[arg(long, value_name = "FILE")]
    emit_graph: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            entry: self.entry.clone(),
            output: self.output.clone(),
            dedupe: self.dedupe.then_some(true),
            memoize: self.memoize.then_some(true),
            max_units: self.max_units,
            jobs: self.jobs,
            banner: None,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(bundle_error) = err.downcast_ref::<BundleError>() {
                match bundle_error.path() {
                    Some(path) => error!("{} failure at {}", bundle_error.kind(), path.display()),
                    None => error!("{} failure", bundle_error.kind()),
                }
            }
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply(cli.layer());
    debug!("Effective configuration: {config:?}");

    let orchestrator = BundleOrchestrator::new(config);
    let destination = if cli.stdout {
        Destination::Stdout
    } else {
        orchestrator
            .destination()
            .ok_or_else(|| anyhow!("No output file specified; use --output or --stdout"))?
    };

    let summary = orchestrator.bundle(&destination)?;
    if let Some(path) = &cli.emit_graph {
        orchestrator::write_graph(&summary.graph, path)?;
    }

    info!(
        "Bundled {} unit(s) into {} bytes",
        summary.graph.len(),
        summary.bytes
    );
    Ok(())
}
