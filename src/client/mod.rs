//! Connection engine: handshake, token multiplexing and the read loop.
//!
//! One [`Connection`] owns one TCP socket. Many queries run concurrently
//! over it, each identified by a 64-bit token; a background read loop
//! demultiplexes server replies back to the per-query waiters. All
//! socket writes pass through a single serialization lane, and a waiter
//! is registered only after its query's bytes have been fully handed to
//! the OS.
//!
//! # Example
//!
//! ```rust,no_run
//! use reql_client::{Connection, QueryResponse};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), reql_client::DriverError> {
//!     let conn = Connection::connect("rethinkdb://admin@localhost:28015").await?;
//!
//!     // Payloads come from a term builder; `[1, 1]` is START of the
//!     // literal `1`.
//!     match conn.run(b"[1, 1]").await? {
//!         QueryResponse::Value(datum) => println!("got {datum:?}"),
//!         QueryResponse::Rows { docs, .. } => println!("{} rows", docs.len()),
//!         other => println!("unexpected: {other:?}"),
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

mod config;
mod cursor;
pub mod token;

pub use config::ConnectOptions;
pub use cursor::{Continuation, Cursor};

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::error::{DriverError, DriverResult};
use crate::protocol::codec::{
    self, QueryType, FRAME_HEADER_LEN, MAX_PAYLOAD_LEN,
};
use crate::protocol::datum::Datum;
use crate::protocol::handshake::{Handshake, HandshakeStep};
use crate::protocol::response::{decode_response, Envelope};
use crate::transport::{ByteStream, ReadStream, WriteStream};

/// What a query ultimately delivers to its waiter.
#[derive(Debug)]
pub enum QueryResponse {
    /// A single atom.
    Value(Datum),
    /// A batch of row documents. `continuation` is present iff the
    /// server holds more rows for this token.
    Rows {
        docs: Vec<Datum>,
        continuation: Option<Continuation>,
    },
    /// A response type code this driver does not recognize.
    Unknown { code: i64 },
}

impl QueryResponse {
    /// View a response as a pull-style cursor. Atoms become a cursor
    /// over a single batch.
    pub fn into_cursor(self) -> Cursor {
        match self {
            QueryResponse::Rows { docs, continuation } => Cursor::new(docs, continuation),
            QueryResponse::Value(Datum::Array(items)) => Cursor::new(items, None),
            QueryResponse::Value(datum) => Cursor::new(vec![datum], None),
            QueryResponse::Unknown { .. } => Cursor::new(vec![], None),
        }
    }
}

/// A started query: its token plus the awaitable response slot.
#[derive(Debug)]
pub struct QueryHandle {
    token: u64,
    rx: oneshot::Receiver<DriverResult<QueryResponse>>,
}

impl QueryHandle {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Wait for the first (and for atoms, only) response.
    pub async fn response(self) -> DriverResult<QueryResponse> {
        match self.rx.await {
            Ok(result) => result,
            // The connection dropped the sender without delivering; only
            // teardown does that.
            Err(_) => Err(DriverError::Io("disconnected".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ConnState {
    Unconnected,
    HandshakeSent,
    Connected,
    Errored(DriverError),
    Terminated,
}

type Waiter = oneshot::Sender<DriverResult<QueryResponse>>;

/// Shared state behind a [`Connection`] handle. The in-flight map keys
/// live tokens; a `None` slot is a partial sequence waiting for its
/// cursor to re-arm.
#[derive(Debug)]
pub(crate) struct ConnectionInner {
    state: Mutex<ConnState>,
    writer: AsyncMutex<Option<WriteStream>>,
    in_flight: Mutex<HashMap<u64, Option<Waiter>>>,
}

/// Handle to one multiplexed connection. Cheap to clone; the socket and
/// read loop live as long as any handle or in-flight query does.
#[derive(Clone, Debug)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect to a `rethinkdb://[user[:password]@]host[:port]` URL with
    /// the default protocol version.
    pub async fn connect(url: &str) -> DriverResult<Connection> {
        ConnectOptions::parse_url(url)?.connect().await
    }

    pub(crate) async fn connect_with(options: ConnectOptions) -> DriverResult<Connection> {
        let inner = Arc::new(ConnectionInner {
            state: Mutex::new(ConnState::Unconnected),
            writer: AsyncMutex::new(None),
            in_flight: Mutex::new(HashMap::new()),
        });

        let mut stream = ByteStream::connect(&options.host, options.port).await?;
        let mut handshake =
            Handshake::new(options.version, &options.username, &options.password);

        inner.set_state(ConnState::HandshakeSent);
        if let Err(e) = drive_handshake(&mut stream, &mut handshake).await {
            stream.close().await;
            inner.set_state(ConnState::Errored(e.clone()));
            return Err(e);
        }

        let (read_half, write_half) = stream.into_split();
        *inner.writer.lock().await = Some(write_half);
        inner.set_state(ConnState::Connected);
        info!(host = %options.host, port = options.port, "connection established");

        tokio::spawn(read_loop(inner.clone(), read_half));
        Ok(Connection { inner })
    }

    // ==================== Query Operations ====================

    /// Start a query and wait for its first response.
    pub async fn run(&self, payload: &[u8]) -> DriverResult<QueryResponse> {
        self.start_query(payload).await?.response().await
    }

    /// Start a query: allocate a token, send the START frame, and hand
    /// back the token plus the response slot. The payload is the full
    /// serialized query array, e.g. `[1, term, options]`.
    pub async fn start_query(&self, payload: &[u8]) -> DriverResult<QueryHandle> {
        let token = token::next_token()?;
        let rx = self.inner.send_new_query(token, payload).await?;
        debug!(token, "query started");
        Ok(QueryHandle { token, rx })
    }

    /// Wait until the server has applied every previous noreply write on
    /// this connection.
    pub async fn noreply_wait(&self) -> DriverResult<()> {
        let payload = codec::control_payload(QueryType::NoreplyWait);
        self.run(&payload).await.map(|_| ())
    }

    /// Ask the server to describe itself.
    pub async fn server_info(&self) -> DriverResult<Datum> {
        let payload = codec::control_payload(QueryType::ServerInfo);
        match self.run(&payload).await? {
            QueryResponse::Value(datum) => Ok(datum),
            other => Err(DriverError::Protocol(format!(
                "unexpected response to SERVER_INFO: {other:?}"
            ))),
        }
    }

    // ==================== Lifecycle ====================

    pub fn is_connected(&self) -> bool {
        *self.inner.state.lock().unwrap() == ConnState::Connected
    }

    /// The error that poisoned this connection, if any.
    pub fn last_error(&self) -> Option<DriverError> {
        match &*self.inner.state.lock().unwrap() {
            ConnState::Errored(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// Close the connection. Every in-flight waiter is drained with a
    /// disconnect error; no waiter is ever abandoned. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if matches!(*state, ConnState::Terminated) {
                return;
            }
            *state = ConnState::Terminated;
        }
        let drained = self
            .inner
            .drain_waiters(DriverError::Io("disconnected".to_string()));
        if drained > 0 {
            warn!(drained, "connection closed with queries in flight");
        }
        let mut guard = self.inner.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            writer.shutdown().await;
        }
        info!("connection closed");
    }
}

impl ConnectionInner {
    fn set_state(&self, state: ConnState) {
        *self.state.lock().unwrap() = state;
    }

    fn ensure_connected(&self) -> DriverResult<()> {
        match *self.state.lock().unwrap() {
            ConnState::Connected => Ok(()),
            _ => Err(DriverError::NotConnected),
        }
    }

    /// Send a START frame for a fresh token. The waiter is registered
    /// strictly after the bytes are handed to the OS, while the lane is
    /// still held, so no later write can overtake the registration.
    async fn send_new_query(
        &self,
        token: u64,
        payload: &[u8],
    ) -> DriverResult<oneshot::Receiver<DriverResult<QueryResponse>>> {
        self.ensure_connected()?;
        if payload.len() > MAX_PAYLOAD_LEN as usize {
            return Err(DriverError::Protocol(format!(
                "payload of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_PAYLOAD_LEN
            )));
        }

        let frame = codec::encode_frame(token, payload);
        let (tx, rx) = oneshot::channel();

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(DriverError::NotConnected)?;
        match writer.write(&frame).await {
            Ok(()) => {
                self.in_flight.lock().unwrap().insert(token, Some(tx));
                Ok(rx)
            }
            Err(e) => {
                drop(guard);
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    /// Re-arm an existing token and send a control frame on it. Used for
    /// CONTINUE and STOP: the token is already in the map, so the slot
    /// is armed before the write and a fast reply cannot slip past it.
    async fn send_on_token(
        &self,
        token: u64,
        query_type: QueryType,
    ) -> DriverResult<QueryResponse> {
        self.ensure_connected()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.in_flight.lock().unwrap();
            match map.get_mut(&token) {
                Some(slot) => *slot = Some(tx),
                None => {
                    return Err(DriverError::Internal(format!(
                        "no pending stream for token {token}"
                    )))
                }
            }
        }

        let frame = codec::encode_frame(token, &codec::control_payload(query_type));
        {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(DriverError::NotConnected)?;
            if let Err(e) = writer.write(&frame).await {
                drop(guard);
                self.fail(e.clone());
                return Err(e);
            }
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Io("disconnected".to_string())),
        }
    }

    pub(crate) async fn continue_query(&self, token: u64) -> DriverResult<QueryResponse> {
        debug!(token, "continuing cursor");
        self.send_on_token(token, QueryType::Continue).await
    }

    pub(crate) async fn stop_query(&self, token: u64) -> DriverResult<QueryResponse> {
        debug!(token, "stopping cursor");
        self.send_on_token(token, QueryType::Stop).await
    }

    /// Poison the connection and drain every in-flight waiter exactly
    /// once. A connection already terminated by `close()` only drains.
    fn fail(&self, error: DriverError) {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ConnState::Terminated | ConnState::Errored(_) => {}
                _ => {
                    warn!(error = %error, "connection failed");
                    *state = ConnState::Errored(error.clone());
                }
            }
        }
        self.drain_waiters(error);
    }

    fn drain_waiters(&self, error: DriverError) -> usize {
        let mut map = self.in_flight.lock().unwrap();
        let mut delivered = 0;
        for (_, slot) in map.drain() {
            if let Some(tx) = slot {
                if tx.send(Err(error.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

async fn drive_handshake(
    stream: &mut ByteStream,
    handshake: &mut Handshake,
) -> DriverResult<()> {
    stream.write(&handshake.initial_bytes()).await?;
    loop {
        let reply = stream.read_zero_terminated_ascii().await?;
        match handshake.advance(reply.as_bytes())? {
            HandshakeStep::Reply(bytes) => stream.write(&bytes).await?,
            HandshakeStep::Done => return Ok(()),
        }
    }
}

/// The single reader of the socket. Runs until the connection dies.
async fn read_loop(inner: Arc<ConnectionInner>, mut reader: ReadStream) {
    loop {
        let header_bytes = match reader.read_exact(FRAME_HEADER_LEN).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "read loop finished");
                inner.fail(DriverError::Io("disconnected".to_string()));
                return;
            }
        };
        // Twelve bytes in hand, so the header decode cannot fail.
        let header = codec::decode_frame_header(&header_bytes).expect("12-byte header");

        if header.payload_len > MAX_PAYLOAD_LEN {
            inner.fail(DriverError::Protocol(format!(
                "oversized response frame of {} bytes",
                header.payload_len
            )));
            return;
        }

        let payload = match reader.read_exact(header.payload_len as usize).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "read loop finished mid-frame");
                inner.fail(DriverError::Io("disconnected".to_string()));
                return;
            }
        };

        let envelope = match decode_response(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(token = header.token, error = %e, "undecodable response");
                inner.fail(DriverError::Protocol("invalid response".to_string()));
                return;
            }
        };

        dispatch(&inner, header.token, envelope);
    }
}

/// Route one decoded envelope to its waiter. Terminal envelopes remove
/// the token before delivery; partial batches leave it registered for
/// the continuation.
fn dispatch(inner: &Arc<ConnectionInner>, token: u64, envelope: Envelope) {
    let waiter = {
        let mut map = inner.in_flight.lock().unwrap();
        if envelope.is_terminal() {
            match map.remove(&token) {
                Some(slot) => slot,
                None => {
                    // A reply for a stopped or unknown query; the server
                    // is allowed to race us here.
                    debug!(token, "response for unknown token, ignoring");
                    return;
                }
            }
        } else {
            match map.get_mut(&token) {
                Some(slot) => slot.take(),
                None => {
                    debug!(token, "partial response for unknown token, ignoring");
                    return;
                }
            }
        }
    };
    let Some(tx) = waiter else {
        debug!(token, "response with no armed waiter, dropping");
        return;
    };

    let result = match envelope {
        Envelope::Value(datum) => Ok(QueryResponse::Value(datum)),
        Envelope::Rows { docs, partial } => {
            let continuation = partial.then(|| Continuation {
                token,
                inner: inner.clone(),
                used: AtomicBool::new(false),
            });
            Ok(QueryResponse::Rows { docs, continuation })
        }
        Envelope::Error { kind, message } => Err(DriverError::Query { kind, message }),
        Envelope::WaitComplete => Ok(QueryResponse::Value(Datum::Null)),
        Envelope::Unknown { code } => {
            warn!(token, code, "unknown response type code");
            Ok(QueryResponse::Unknown { code })
        }
    };

    if tx.send(result).is_err() {
        debug!(token, "waiter dropped before delivery");
    }
}
