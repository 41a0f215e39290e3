use std::io::{BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::Deserializer;
use tracing::{debug, trace};

use crate::command::{Request, Response, Value};
use crate::engine::StoreEngine;
use crate::{Result, StoreError};

/// one socket connection to a [`StoreServer`]
///
/// [`StoreServer`]: ./struct.StoreServer.html
struct Connection {
    reader: Deserializer<IoRead<BufReader<TcpStream>>>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn open(addr: SocketAddr, timeout: Option<Duration>) -> Result<Self> {
        let tcp_reader = TcpStream::connect(addr)?;
        tcp_reader.set_read_timeout(timeout)?;
        let tcp_writer = tcp_reader.try_clone()?;
        debug!("connected to {}", addr);

        Ok(Connection {
            reader: Deserializer::from_reader(BufReader::new(tcp_reader)),
            writer: BufWriter::new(tcp_writer),
        })
    }

    fn send(&mut self, req: &Request) -> Result<Response> {
        serde_json::to_writer(&mut self.writer, req)?;
        self.writer.flush()?;
        Ok(Response::deserialize(&mut self.reader)?)
    }
}

/// `StoreClient` is a [`StoreEngine`] that forwards every request to a [`StoreServer`].
///
/// Clones share one connection, and requests from clones are serialized over it. A request
/// that fails at the socket level drops the connection; the next request opens a new one.
///
/// [`StoreServer`]: ./struct.StoreServer.html
#[derive(Clone)]
pub struct StoreClient {
    addr: SocketAddr,
    timeout: Option<Duration>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl StoreClient {
    /// creates a client and establishes a socket connection to the server at the given `addr`
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        StoreClient::open(addr, None)
    }

    /// like [`StoreClient::connect`], but a response that takes longer than `timeout` to
    /// arrive fails the request
    pub fn with_timeout<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<Self> {
        StoreClient::open(addr, Some(timeout))
    }

    fn open<A: ToSocketAddrs>(addr: A, timeout: Option<Duration>) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            StoreError::InvalidArgument("address did not resolve to anything".to_string())
        })?;
        let conn = Connection::open(addr, timeout)?;
        Ok(StoreClient {
            addr,
            timeout,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// the address of the server
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// sends `req` and reads its response, reconnecting first if the last request failed
    fn round_trip(&self, req: &Request) -> Result<Response> {
        let mut guard = self.conn.lock().expect("client connection mutex poisoned");
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => Connection::open(self.addr, self.timeout)?,
        };
        let resp = conn.send(req)?;
        *guard = Some(conn);
        trace!("response from {}: {:?}", self.addr, resp);
        Ok(resp)
    }
}

impl StoreEngine for StoreClient {
    fn execute(&self, req: Request) -> Result<Value> {
        match self.round_trip(&req)? {
            Response::Ok(value) => Ok(value),
            Response::Err(msg) => Err(StoreError::Remote(msg)),
            Response::Batch(_) => Err(StoreError::UnexpectedResponse(
                "batch response to a single request".to_string(),
            )),
        }
    }

    /// sends all of `reqs` in a single request frame
    fn execute_batch(&self, reqs: Vec<Request>) -> Result<Vec<Response>> {
        let expected = reqs.len();
        match self.round_trip(&Request::Batch(reqs))? {
            Response::Batch(responses) if responses.len() == expected => Ok(responses),
            Response::Batch(responses) => Err(StoreError::UnexpectedResponse(format!(
                "{} responses for a batch of {} requests",
                responses.len(),
                expected
            ))),
            Response::Err(msg) => Err(StoreError::Remote(msg)),
            Response::Ok(value) => Err(StoreError::UnexpectedResponse(format!(
                "single response {:?} to a batch",
                value
            ))),
        }
    }
}
