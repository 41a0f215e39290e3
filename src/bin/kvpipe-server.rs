//! this binary starts a store server over an in-memory engine
//! to see the list of options, type: `kvpipe-server --help`

use std::net::SocketAddr;
use std::process::exit;
use clap::{crate_version, App, Arg, arg_enum, value_t};
use kvpipe::{MemStore, RayonThreadPool, Result, SharedQueueThreadPool, StoreError, StoreServer, ThreadPool};
use kvpipe::config::DEFAULT_ADDRESS;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Pool {
        shared,
        rayon
    }
}

const DEFAULT_POOL: Pool = Pool::shared;
const DEFAULT_THREADS: &str = "8";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    pool: Pool,
    threads: u32,
}

impl Opt {
    /// validates the `addr` and `threads` parameters
    /// returns `Ok<Opt>` if everything is valid
    /// # Errors
    /// returns [`StoreError::InvalidArgument`] if one of the parameters is invalid
    ///
    fn build(addr: &str, pool: Pool, threads: &str) -> Result<Opt> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| StoreError::InvalidArgument(format!("could not parse {} into an IP addess and port", &addr)))?;
        let threads: u32 = match threads.parse() {
            Ok(n) if n > 0 => n,
            _ => return Err(StoreError::InvalidArgument(format!("threads must be a positive number, got {}", threads))),
        };

        Ok(Opt { addr, pool, threads })
    }
}

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    // parse command line args
    let matches = App::new("kvpipe-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("serves an in-memory key-value and data-structure store")
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("IP_ADDR:PORT")
            .help("sets the IP_ADDR:PORT that the server listens on")
            .default_value(DEFAULT_ADDRESS))
        .arg(Arg::with_name("pool")
            .long("pool")
            .value_name("POOL")
            .help("sets the thread pool to serve connections on, either 'shared' or 'rayon'")
            .possible_values(&Pool::variants())
            .default_value("shared"))
        .arg(Arg::with_name("threads")
            .long("threads")
            .value_name("N")
            .help("sets the number of threads in the pool, i.e. concurrent connections")
            .default_value(DEFAULT_THREADS))
        .get_matches();

    let addr = matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS);
    let pool: Pool = value_t!(matches, "pool", Pool).unwrap_or(DEFAULT_POOL);
    let threads = matches.value_of("threads").unwrap_or(DEFAULT_THREADS);
    let opt = match Opt::build(addr, pool, threads) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("kvpipe-server {}", env!("CARGO_PKG_VERSION"));
    info!("Thread pool: {} with {} threads", opt.pool, opt.threads);

    let engine = MemStore::new();
    match opt.pool {
        Pool::shared => StoreServer::new(engine, SharedQueueThreadPool::new(opt.threads)?).run(opt.addr),
        Pool::rayon => StoreServer::new(engine, RayonThreadPool::new(opt.threads)?).run(opt.addr),
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
