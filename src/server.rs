use crate::command::{Request, Response};
use crate::engine::StoreEngine;
use crate::thread_pool::ThreadPool;
use crate::Result;
use serde_json::Deserializer;
use std::io::{BufReader, BufWriter, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{debug, error, info, trace};

/// A TCP socket server implementation over a store engine.
/// It listens for incoming [`Request`]s on a [`SocketAddr`](https://doc.rust-lang.org/std/net/enum.SocketAddr.html),
/// and serves every connection on a thread of its pool.
///
/// Each thread receives a handle to a [`StoreEngine`], and uses that engine to process the
/// requests of its connection. A [`Request::Batch`] is executed as a whole and answered with a
/// single [`Response::Batch`].
///
/// # Example
/// Create and run a new server listening on "127.0.0.1:4000", with 4 threads running on a
/// shared queue thread pool, using the in-memory engine
/// ```rust
/// use kvpipe::{MemStore, StoreServer};
/// use kvpipe::thread_pool::{SharedQueueThreadPool, ThreadPool};
/// # fn main() -> kvpipe::Result<()> {
/// let pool = SharedQueueThreadPool::new(4)?;
/// let server = StoreServer::new(MemStore::new(), pool);
/// // server.run("127.0.0.1:4000")?;
/// # Ok(())
/// # }
/// ```
pub struct StoreServer<E: StoreEngine, P: ThreadPool> {
    /// the engine requests are executed against
    engine: E,
    /// a pool of threads that will perform work using a handle to the engine
    pool: P,
}

impl<E: StoreEngine, P: ThreadPool> StoreServer<E, P> {
    /// Create a new `StoreServer` using the given [`StoreEngine`] and [`ThreadPool`] implementation.
    pub fn new(engine: E, pool: P) -> Self {
        StoreServer { engine, pool }
    }

    /// starts a server listening on the given address.
    /// Each connection that comes in gets serviced on its own thread from the ThreadPool
    ///
    /// # Errors
    /// returns [`StoreError`] if the server could not be started
    ///
    /// [`StoreError`]: ./enum.StoreError.html
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.run_on(listener)
    }

    /// serves connections accepted by an already bound `listener`
    pub fn run_on(self, listener: TcpListener) -> Result<()> {
        info!("Listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let eng = self.engine.clone();
                    self.pool.spawn(move || {
                        if let Err(e) = serve(eng, stream) {
                            error!("Error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Answers every [`Request`] read from `tcp` until the client hangs up.
/// Requests and responses are streamed as concatenated JSON values, one response per request.
fn serve<E: StoreEngine>(engine: E, tcp: TcpStream) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    let requests = Deserializer::from_reader(BufReader::new(&tcp)).into_iter::<Request>();
    let mut writer = BufWriter::new(&tcp);

    for req in requests {
        let resp = respond(&engine, req?);
        trace!("Response to {}: {:?}", peer_addr, resp);
        serde_json::to_writer(&mut writer, &resp)?;
        writer.flush()?;
    }
    debug!("Connection from {} closed", peer_addr);
    Ok(())
}

/// executes one request frame; a batch frame is executed as a whole
fn respond<E: StoreEngine>(engine: &E, req: Request) -> Response {
    match req {
        Request::Batch(reqs) => {
            debug!("Executing a batch of {} requests", reqs.len());
            engine
                .execute_batch(reqs)
                .map(Response::Batch)
                .unwrap_or_else(|e| Response::Err(e.to_string()))
        }
        req => engine
            .execute(req)
            .map(Response::Ok)
            .unwrap_or_else(|e| Response::Err(e.to_string())),
    }
}
