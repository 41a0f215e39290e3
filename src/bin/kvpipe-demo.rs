//! The kvpipe-demo executable runs the bulk pipeline and the queue coordination against a
//! running `kvpipe-server`. It supports the following command line arguments:
//!
//! `kvpipe-demo [--config FILE] [--addr IP-PORT] pipeline [--items N] [--batch-size N]`
//!
//!     Load N items in batches, then remove them all again.
//!
//! `kvpipe-demo [--config FILE] [--addr IP-PORT] queue [--messages N] [--consumers N]`
//!
//!     Produce the messages "1" to "N" onto a queue drained by N consumer threads.
//!
//! `kvpipe-demo [--config FILE] [--addr IP-PORT] [all]`
//!
//!     Run both demos, one after the other.
//!
//! Settings are read from `config/demo.json` when `--config` is not given and that file
//! exists. Print an error and return a non-zero exit code if the configuration is invalid or
//! the server can not be reached.

use std::path::Path;
use std::process::exit;
use clap::{crate_version, App, Arg, ArgMatches, SubCommand};
use kvpipe::config::DEFAULT_CONFIG_FILE;
use kvpipe::{BatchPipeline, Config, QueueCoordinator, Result, SharedQueueThreadPool, StoreClient, StoreError, ThreadPool};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Demo {
    Pipeline,
    Queue,
    All,
}

/// ['Opt'] holds the configuration after command line overrides, and the demo to run
#[derive(Debug)]
struct Opt {
    config: Config,
    demo: Demo,
    /// set when the default config file was missing, logged once logging is up
    defaulted: bool,
}

fn main() {
    let matches = App::new("kvpipe-demo")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("bulk pipeline and queue coordination against a kvpipe-server")
        .arg(Arg::with_name("config")
            .long("config")
            .value_name("FILE")
            .takes_value(true)
            .help("sets the JSON configuration file"))
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .takes_value(true)
            .help("sets the IP_ADDR:PORT of the server to connect to"))
        .subcommands(vec![
            SubCommand::with_name("pipeline")
                .about("Load items in batches, then remove them again")
                .arg(Arg::with_name("items").long("items").value_name("N").takes_value(true))
                .arg(Arg::with_name("batch-size").long("batch-size").value_name("N").takes_value(true)),
            SubCommand::with_name("queue")
                .about("Produce messages onto a queue drained by several consumers")
                .arg(Arg::with_name("messages").long("messages").value_name("N").takes_value(true))
                .arg(Arg::with_name("consumers").long("consumers").value_name("N").takes_value(true)),
            SubCommand::with_name("all").about("Run every demo"),
        ])
        .get_matches();

    let opt = match parse_options(&matches) {
        Ok(opt) => opt,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        }
    };

    // the level was validated along with the rest of the config
    subscriber_config(opt.config.level().unwrap_or(Level::INFO));
    if opt.defaulted {
        warn!("{} not found, using the default configuration", DEFAULT_CONFIG_FILE);
    }

    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}

/// parses the matches from the command line into an [`Opt`] struct
fn parse_options(matches: &ArgMatches) -> Result<Opt> {
    let mut defaulted = false;
    let mut config = match matches.value_of("config") {
        Some(path) => Config::load(Path::new(path))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Config::load(Path::new(DEFAULT_CONFIG_FILE))?,
        None => {
            defaulted = true;
            Config::default()
        }
    };
    if let Some(addr) = matches.value_of("addr") {
        config.store.addr = addr.to_string();
    }

    let demo = match matches.subcommand() {
        ("pipeline", Some(args)) => {
            if let Some(n) = args.value_of("items") {
                config.pipeline.item_count = parse_count(n, "items")?;
            }
            if let Some(n) = args.value_of("batch-size") {
                config.pipeline.batch_size = parse_count(n, "batch-size")?;
            }
            Demo::Pipeline
        }
        ("queue", Some(args)) => {
            if let Some(n) = args.value_of("messages") {
                config.queue.messages = parse_count(n, "messages")?;
            }
            if let Some(n) = args.value_of("consumers") {
                config.queue.consumers = parse_count(n, "consumers")?;
            }
            Demo::Queue
        }
        _ => Demo::All,
    };
    config.validate()?;

    Ok(Opt { config, demo, defaulted })
}

fn parse_count(value: &str, name: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidArgument(format!("{} must be a number, got {}", name, value)))
}

/// connects to the server and runs the demo selected in `opt`
fn run(opt: Opt) -> Result<()> {
    info!("kvpipe-demo {}", env!("CARGO_PKG_VERSION"));
    let config = opt.config;
    let client = StoreClient::with_timeout(config.store.addr.as_str(), config.response_timeout())
        .map_err(|e| {
            error!("The store server at {} is not reachable", config.store.addr);
            e
        })?;

    match opt.demo {
        Demo::Pipeline => pipelining(&config, client),
        Demo::Queue => queueing(&config, client),
        Demo::All => {
            queueing(&config, client.clone())?;
            pipelining(&config, client)
        }
    }
}

fn pipelining(config: &Config, client: StoreClient) -> Result<()> {
    // batches are sent one at a time, a single worker is enough
    let pool = SharedQueueThreadPool::new(1)?;
    let pipeline = BatchPipeline::new(client, pool, config.pipeline_options());
    let (loaded, removed) = pipeline.run(config.pipeline.item_count)?;

    for report in &[loaded, removed] {
        info!(
            "{}: {} items, {} batches ({} faulted, {} items repaired) in {:?}",
            report.operation, report.items, report.batches, report.faulted_batches, report.repaired, report.elapsed
        );
    }
    Ok(())
}

fn queueing(config: &Config, client: StoreClient) -> Result<()> {
    let coordinator = QueueCoordinator::new(client, config.queue.name.clone(), config.queue.consumers)?;
    let messages = (1..=config.queue.messages).map(|i| i.to_string()).collect();
    let report = coordinator.run(messages)?;

    for consumer in &report.consumers {
        info!("{} received {} messages", consumer.name, consumer.received.len());
    }
    info!("Produced {} messages, received {}", report.produced, report.total_received());
    Ok(())
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events at `level` or more severe will be written
        .with_max_level(level)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
