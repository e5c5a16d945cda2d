//! SCRAM-SHA-256 client computations (RFC 5802 over SHA-256).
//!
//! Pure message math, no I/O. The handshake state machine feeds server
//! messages in and writes the returned strings out.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{DriverError, DriverResult};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 24;

/// Client side of one SCRAM exchange. Discarded once the handshake
/// completes or fails.
pub struct ScramClient {
    password: String,
    nonce: String,
    client_first_bare: String,
}

impl ScramClient {
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_nonce(username, password, generate_nonce())
    }

    /// Construct with a caller-supplied nonce. Production code uses
    /// [`ScramClient::new`]; fixed nonces exist for RFC test vectors.
    pub fn with_nonce(username: &str, password: &str, nonce: String) -> Self {
        let client_first_bare = format!("n={},r={}", escape_username(username), nonce);
        Self {
            password: password.to_string(),
            nonce,
            client_first_bare,
        }
    }

    /// The full client-first-message, including the GS2 header.
    pub fn client_first_message(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Consume the server-first-message and produce the
    /// client-final-message along with the server signature we expect to
    /// see in the server-final-message.
    pub fn client_final(&self, server_first: &str) -> DriverResult<(String, Vec<u8>)> {
        let mut server_nonce = "";
        let mut salt_b64 = "";
        let mut iterations = 0u32;
        for attr in server_first.split(',') {
            if let Some(v) = attr.strip_prefix("r=") {
                server_nonce = v;
            } else if let Some(v) = attr.strip_prefix("s=") {
                salt_b64 = v;
            } else if let Some(v) = attr.strip_prefix("i=") {
                iterations = v
                    .parse()
                    .map_err(|_| DriverError::Auth("bad iteration count".to_string()))?;
            }
        }

        if !server_nonce.starts_with(self.nonce.as_str()) || server_nonce == self.nonce {
            return Err(DriverError::Auth("server nonce mismatch".to_string()));
        }
        if iterations == 0 {
            return Err(DriverError::Auth("missing iteration count".to_string()));
        }
        let salt = BASE64
            .decode(salt_b64)
            .map_err(|_| DriverError::Auth("bad salt encoding".to_string()))?;

        // SaltedPassword = PBKDF2-HMAC-SHA-256(password, salt, i)
        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);

        // "biws" is base64("n,,"): no channel binding.
        let client_final_without_proof = format!("c=biws,r={server_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());

        let client_final = format!("{},p={}", client_final_without_proof, BASE64.encode(&proof));
        Ok((client_final, server_signature))
    }
}

/// Check the server-final-message against the signature computed in
/// [`ScramClient::client_final`].
pub fn verify_server_signature(server_final: &str, expected: &[u8]) -> DriverResult<()> {
    for attr in server_final.split(',') {
        if let Some(msg) = attr.strip_prefix("e=") {
            return Err(DriverError::Auth(msg.to_string()));
        }
        if let Some(v) = attr.strip_prefix("v=") {
            let signature = BASE64
                .decode(v)
                .map_err(|_| DriverError::Auth("bad server signature encoding".to_string()))?;
            if signature == expected {
                return Ok(());
            }
            return Err(DriverError::Auth("server signature mismatch".to_string()));
        }
    }
    Err(DriverError::Auth(
        "server final message carries no signature".to_string(),
    ))
}

/// Usernames embed into the SCRAM attribute list, so '=' and ',' must be
/// escaped per RFC 5802. '=' first: the escapes themselves contain '='.
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
