//! Wire protocol: framing, handshake, authentication and response
//! decoding. Everything here is sans-I/O; the transport and connection
//! layers do the reading and writing.

pub mod codec;
pub mod datum;
pub mod handshake;
pub mod response;
pub mod scram;

pub use codec::{FrameHeader, QueryType};
pub use datum::Datum;
pub use handshake::{Handshake, HandshakeStep, ProtocolVersion};
pub use response::Envelope;
