//! Response envelope decoding.
//!
//! One server reply is a JSON object with a type code `t`, a result
//! array `r`, and optional `b` (backtrace), `n` (notes) and `p`
//! (profile) keys. The decoder maps the envelope onto a tagged result;
//! whether a continuation handle accompanies a partial batch is the
//! connection's concern.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DriverError, DriverResult, QueryErrorKind};
use crate::protocol::datum::{decode_datum, Datum};

pub const SUCCESS_ATOM: i64 = 1;
pub const SUCCESS_SEQUENCE: i64 = 2;
pub const SUCCESS_PARTIAL: i64 = 3;
pub const WAIT_COMPLETE: i64 = 4;
pub const SERVER_INFO: i64 = 5;
pub const CLIENT_ERROR: i64 = 16;
pub const COMPILE_ERROR: i64 = 17;
pub const RUNTIME_ERROR: i64 = 18;

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    t: i64,
    #[serde(default)]
    r: Vec<Value>,
    // Carried by error and profiled responses; decoded only to tolerate
    // their presence.
    #[serde(default)]
    b: Option<Value>,
    #[serde(default)]
    p: Option<Value>,
    #[serde(default)]
    n: Option<Value>,
}

/// Decoded form of one server reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// A single atom.
    Value(Datum),
    /// A batch of row documents; `partial` means more batches remain and
    /// the token stays live for a CONTINUE.
    Rows { docs: Vec<Datum>, partial: bool },
    /// Server-reported error for this query only.
    Error {
        kind: QueryErrorKind,
        message: String,
    },
    /// Terminal reply to a NOREPLY_WAIT.
    WaitComplete,
    /// Response type code we do not recognize (forward compatibility).
    Unknown { code: i64 },
}

impl Envelope {
    /// Terminal envelopes free their token; partial batches keep it.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Envelope::Rows { partial: true, .. })
    }
}

/// Parse one response payload. A decode failure here is fatal to the
/// connection; the read loop cannot resynchronize on garbage.
pub fn decode_response(payload: &[u8]) -> DriverResult<Envelope> {
    let raw: RawEnvelope = serde_json::from_slice(payload)
        .map_err(|e| DriverError::Protocol(format!("invalid response: {e}")))?;
    let _ = (&raw.b, &raw.p, &raw.n);

    match raw.t {
        SUCCESS_ATOM | SERVER_INFO => {
            let [value] = <[Value; 1]>::try_from(raw.r).map_err(|r| {
                DriverError::Protocol(format!("atom response with {} results", r.len()))
            })?;
            Ok(Envelope::Value(decode_datum(value)?))
        }
        SUCCESS_SEQUENCE => decode_sequence(raw.r, false),
        SUCCESS_PARTIAL => decode_sequence(raw.r, true),
        WAIT_COMPLETE => Ok(Envelope::WaitComplete),
        CLIENT_ERROR => decode_error(raw.r, QueryErrorKind::Client),
        COMPILE_ERROR => decode_error(raw.r, QueryErrorKind::Compile),
        RUNTIME_ERROR => decode_error(raw.r, QueryErrorKind::Runtime),
        code => Ok(Envelope::Unknown { code }),
    }
}

fn decode_sequence(results: Vec<Value>, partial: bool) -> DriverResult<Envelope> {
    // Partial batches always stay batches: the continuation has to have a
    // batch to follow. A terminal sequence of scalars is a plain value.
    if !partial && !results.is_empty() && !results.iter().all(Value::is_object) {
        let items = results
            .into_iter()
            .map(decode_datum)
            .collect::<DriverResult<Vec<_>>>()?;
        return Ok(Envelope::Value(Datum::Array(items)));
    }
    let docs = results
        .into_iter()
        .map(decode_datum)
        .collect::<DriverResult<Vec<_>>>()?;
    Ok(Envelope::Rows { docs, partial })
}

fn decode_error(results: Vec<Value>, kind: QueryErrorKind) -> DriverResult<Envelope> {
    let message = match results.as_slice() {
        [Value::String(msg)] => msg.clone(),
        _ => {
            return Err(DriverError::Protocol(
                "error response without message".to_string(),
            ))
        }
    };
    Ok(Envelope::Error { kind, message })
}
