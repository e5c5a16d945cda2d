//! Handshake state machine.
//!
//! Brings a freshly connected socket from raw TCP to an authenticated,
//! query-ready channel. The machine is sans-I/O: the connection writes
//! [`Handshake::initial_bytes`], then feeds each zero-terminated server
//! reply to [`Handshake::advance`] and writes whatever comes back, until
//! the machine reports [`HandshakeStep::Done`].
//!
//! Two protocol versions are supported: the legacy V0_4 key-based
//! handshake and the default V1_0 SCRAM-SHA-256 exchange.

use serde::Deserialize;
use serde_json::json;

use crate::error::{DriverError, DriverResult};
use crate::protocol::codec::{PROTOCOL_JSON, VERSION_V0_4, VERSION_V1_0};
use crate::protocol::scram::{self, ScramClient};

/// Literal reply a V0_4 server sends on success.
pub const LEGACY_SUCCESS: &str = "SUCCESS";

/// Wire protocol version negotiated at connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Legacy handshake: plaintext auth key, no SCRAM.
    V0_4,
    /// Current handshake: SCRAM-SHA-256 (RFC 5802) over JSON messages.
    #[default]
    V1_0,
}

/// What the connection should do after feeding a server reply in.
#[derive(Debug)]
pub enum HandshakeStep {
    /// Write these bytes, then read the next zero-terminated reply.
    Reply(Vec<u8>),
    /// Authenticated; the socket is ready for query frames.
    Done,
}

#[derive(Debug, PartialEq, Eq)]
enum State {
    SentMagic,
    SentClientFirst,
    SentClientFinal,
    Authenticated,
}

#[derive(Debug, Deserialize)]
struct ServerGreeting {
    success: Option<bool>,
    error: Option<String>,
    #[serde(default)]
    max_protocol_version: Option<i64>,
    #[serde(default)]
    server_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthReply {
    success: Option<bool>,
    authentication: Option<String>,
    error: Option<String>,
}

pub struct Handshake {
    version: ProtocolVersion,
    state: State,
    scram: ScramClient,
    /// V0_4 only: the plaintext auth key (the user portion of the URL).
    auth_key: String,
    expected_signature: Option<Vec<u8>>,
}

impl Handshake {
    pub fn new(version: ProtocolVersion, username: &str, password: &str) -> Self {
        Self {
            version,
            state: State::SentMagic,
            scram: ScramClient::new(username, password),
            auth_key: username.to_string(),
            expected_signature: None,
        }
    }

    /// The first bytes on the wire, written before any reply is read.
    pub fn initial_bytes(&self) -> Vec<u8> {
        match self.version {
            ProtocolVersion::V0_4 => {
                let key = self.auth_key.as_bytes();
                let mut bytes = Vec::with_capacity(12 + key.len());
                bytes.extend_from_slice(&VERSION_V0_4.to_le_bytes());
                bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
                bytes.extend_from_slice(key);
                bytes.extend_from_slice(&PROTOCOL_JSON.to_le_bytes());
                bytes
            }
            ProtocolVersion::V1_0 => VERSION_V1_0.to_le_bytes().to_vec(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == State::Authenticated
    }

    /// Feed one zero-terminated server reply (without the terminator) in
    /// and get the next action out.
    pub fn advance(&mut self, reply: &[u8]) -> DriverResult<HandshakeStep> {
        match self.version {
            ProtocolVersion::V0_4 => self.advance_legacy(reply),
            ProtocolVersion::V1_0 => self.advance_scram(reply),
        }
    }

    fn advance_legacy(&mut self, reply: &[u8]) -> DriverResult<HandshakeStep> {
        match self.state {
            State::SentMagic => {
                if reply == LEGACY_SUCCESS.as_bytes() {
                    self.state = State::Authenticated;
                    Ok(HandshakeStep::Done)
                } else {
                    Err(DriverError::Handshake(
                        String::from_utf8_lossy(reply).into_owned(),
                    ))
                }
            }
            _ => Err(DriverError::Internal(
                "handshake already complete".to_string(),
            )),
        }
    }

    fn advance_scram(&mut self, reply: &[u8]) -> DriverResult<HandshakeStep> {
        match self.state {
            State::SentMagic => {
                // The greeting may be a bare error string rather than JSON.
                let greeting: ServerGreeting = serde_json::from_slice(reply).map_err(|_| {
                    DriverError::Handshake(String::from_utf8_lossy(reply).into_owned())
                })?;
                if greeting.success != Some(true) {
                    return Err(DriverError::Handshake(greeting.error.unwrap_or_else(
                        || String::from_utf8_lossy(reply).into_owned(),
                    )));
                }
                tracing::debug!(
                    server_version = greeting.server_version.as_deref().unwrap_or("unknown"),
                    max_protocol_version = greeting.max_protocol_version.unwrap_or(0),
                    "server greeting accepted"
                );

                let first = json!({
                    "protocol_version": 0,
                    "authentication_method": "SCRAM-SHA-256",
                    "authentication": self.scram.client_first_message(),
                });
                self.state = State::SentClientFirst;
                Ok(HandshakeStep::Reply(terminated(first.to_string())))
            }
            State::SentClientFirst => {
                let server_first = self.parse_auth_reply(reply)?;
                let (client_final, signature) = self.scram.client_final(&server_first)?;
                self.expected_signature = Some(signature);

                let final_msg = json!({ "authentication": client_final });
                self.state = State::SentClientFinal;
                Ok(HandshakeStep::Reply(terminated(final_msg.to_string())))
            }
            State::SentClientFinal => {
                let server_final = self.parse_auth_reply(reply)?;
                let expected = self
                    .expected_signature
                    .as_deref()
                    .ok_or_else(|| DriverError::Internal("signature not computed".to_string()))?;
                scram::verify_server_signature(&server_final, expected)?;
                self.state = State::Authenticated;
                Ok(HandshakeStep::Done)
            }
            State::Authenticated => Err(DriverError::Internal(
                "handshake already complete".to_string(),
            )),
        }
    }

    fn parse_auth_reply(&self, reply: &[u8]) -> DriverResult<String> {
        let parsed: AuthReply = serde_json::from_slice(reply)
            .map_err(|_| DriverError::Handshake(String::from_utf8_lossy(reply).into_owned()))?;
        if parsed.success != Some(true) {
            return Err(DriverError::Auth(
                parsed.error.unwrap_or_else(|| "authentication rejected".to_string()),
            ));
        }
        parsed
            .authentication
            .ok_or_else(|| DriverError::Auth("reply carries no authentication data".to_string()))
    }
}

fn terminated(msg: String) -> Vec<u8> {
    let mut bytes = msg.into_bytes();
    bytes.push(0);
    bytes
}
