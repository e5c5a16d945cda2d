//! Native async driver for RethinkDB-compatible database servers.
//!
//! The driver speaks the binary, length-prefixed, JSON-payload wire
//! protocol: a handshake with SCRAM-SHA-256 authentication, then many
//! concurrent queries multiplexed over one socket by 64-bit tokens, with
//! streamed result sets fetched batch-by-batch through cursor
//! continuations.
//!
//! Query terms are treated as opaque serialized JSON; pair this crate
//! with a term builder, or write payloads by hand:
//!
//! ```rust,no_run
//! use reql_client::{Connection, QueryResponse};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), reql_client::DriverError> {
//!     let conn = Connection::connect("rethinkdb://admin@localhost:28015").await?;
//!
//!     let mut cursor = conn.run(b"[1, [15, [[14, [\"test\"]], \"users\"]]]")
//!         .await?
//!         .into_cursor();
//!     while let Some(batch) = cursor.next_batch().await? {
//!         for doc in batch {
//!             println!("{doc:?}");
//!         }
//!     }
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{
    ConnectOptions, Connection, Continuation, Cursor, QueryHandle, QueryResponse,
};
pub use error::{DriverError, DriverResult, QueryErrorKind};
pub use protocol::datum::Datum;
pub use protocol::handshake::ProtocolVersion;
