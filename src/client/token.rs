//! Process-global query token allocation.
//!
//! Tokens only need to be unique per connection, but the counter is
//! shared by every connection in the process, which is the stronger
//! guarantee servers have come to rely on when logging tokens.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DriverError, DriverResult};

/// First token handed out by a fresh process.
pub const TOKEN_SEED: u64 = 0x5ADFACE;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(TOKEN_SEED);

/// Allocate the next query token.
pub fn next_token() -> DriverResult<u64> {
    let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    if token == u64::MAX {
        // 2^64 - TOKEN_SEED allocations deep; unreachable in practice.
        return Err(DriverError::Internal(
            "query token space exhausted".to_string(),
        ));
    }
    Ok(token)
}
