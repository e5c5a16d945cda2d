//! Common test utilities for connection tests.
//!
//! Provides a scripted mock server on loopback TCP:
//! - the server side of both handshake versions, including real
//!   SCRAM-SHA-256 proof verification,
//! - frame-level read/write helpers so each test scripts its own
//!   responses.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const TOKEN_SEED: u64 = 0x5ADFACE;

const VERSION_V0_4: u32 = 0x400C_2D20;
const VERSION_V1_0: u32 = 0x34C2_BDC3;
const PROTOCOL_JSON: u32 = 0x7E69_70C7;

const SCRAM_SALT: &[u8] = b"0123456789abcdef";
const SCRAM_ITERATIONS: u32 = 4096;

pub struct MockServer {
    listener: TcpListener,
    port: u16,
}

impl MockServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("rethinkdb://admin@127.0.0.1:{}", self.port)
    }

    pub async fn accept(&self) -> TcpStream {
        let (stream, _) = self.listener.accept().await.unwrap();
        stream
    }
}

pub async fn read_nul_message(stream: &mut TcpStream) -> String {
    let mut bytes = Vec::new();
    loop {
        let b = stream.read_u8().await.unwrap();
        if b == 0 {
            return String::from_utf8(bytes).unwrap();
        }
        bytes.push(b);
    }
}

pub async fn write_nul_message(stream: &mut TcpStream, msg: &str) {
    stream.write_all(msg.as_bytes()).await.unwrap();
    stream.write_all(&[0]).await.unwrap();
    stream.flush().await.unwrap();
}

/// Server side of the V1_0 handshake, verifying the SCRAM client proof
/// against the given password.
pub async fn serve_handshake_v1(stream: &mut TcpStream, username: &str, password: &str) {
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await.unwrap();
    assert_eq!(u32::from_le_bytes(magic), VERSION_V1_0, "wrong magic");

    write_nul_message(
        stream,
        &json!({
            "success": true,
            "min_protocol_version": 0,
            "max_protocol_version": 0,
            "server_version": "2.4.0-mock"
        })
        .to_string(),
    )
    .await;

    let first: Value = serde_json::from_str(&read_nul_message(stream).await).unwrap();
    assert_eq!(first["protocol_version"], 0);
    assert_eq!(first["authentication_method"], "SCRAM-SHA-256");
    let client_first = first["authentication"].as_str().unwrap();
    let client_first_bare = client_first.strip_prefix("n,,").unwrap().to_string();
    assert!(
        client_first_bare.starts_with(&format!("n={username},")),
        "unexpected username in {client_first_bare:?}"
    );
    let client_nonce = client_first_bare
        .split(',')
        .find_map(|attr| attr.strip_prefix("r="))
        .unwrap();

    let server_nonce = format!("{client_nonce}3rfcNHYJY1ZVvWVs7j");
    let server_first = format!(
        "r={server_nonce},s={},i={SCRAM_ITERATIONS}",
        BASE64.encode(SCRAM_SALT)
    );
    write_nul_message(
        stream,
        &json!({ "success": true, "authentication": server_first }).to_string(),
    )
    .await;

    let final_msg: Value = serde_json::from_str(&read_nul_message(stream).await).unwrap();
    let client_final = final_msg["authentication"].as_str().unwrap();
    let (without_proof, proof_b64) = client_final.rsplit_once(",p=").unwrap();
    assert_eq!(without_proof, format!("c=biws,r={server_nonce}"));

    let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
    let mut salted_password = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        SCRAM_SALT,
        SCRAM_ITERATIONS,
        &mut salted_password,
    );
    let client_key = hmac_sha256(&salted_password, b"Client Key");
    let stored_key = sha256(&client_key);
    let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
    let proof = BASE64.decode(proof_b64).unwrap();
    let recovered_key: Vec<u8> = proof
        .iter()
        .zip(client_signature.iter())
        .map(|(a, b)| a ^ b)
        .collect();
    assert_eq!(sha256(&recovered_key), stored_key, "client proof invalid");

    let server_key = hmac_sha256(&salted_password, b"Server Key");
    let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());
    write_nul_message(
        stream,
        &json!({
            "success": true,
            "authentication": format!("v={}", BASE64.encode(server_signature))
        })
        .to_string(),
    )
    .await;
}

/// Server side of the legacy V0_4 handshake.
pub async fn serve_handshake_v0_4(stream: &mut TcpStream, expected_key: &str) {
    let mut magic = [0u8; 4];
    stream.read_exact(&mut magic).await.unwrap();
    assert_eq!(u32::from_le_bytes(magic), VERSION_V0_4, "wrong magic");

    let mut key_len = [0u8; 4];
    stream.read_exact(&mut key_len).await.unwrap();
    let mut key = vec![0u8; u32::from_le_bytes(key_len) as usize];
    stream.read_exact(&mut key).await.unwrap();
    assert_eq!(key, expected_key.as_bytes());

    let mut protocol = [0u8; 4];
    stream.read_exact(&mut protocol).await.unwrap();
    assert_eq!(u32::from_le_bytes(protocol), PROTOCOL_JSON);

    stream.write_all(b"SUCCESS\0").await.unwrap();
    stream.flush().await.unwrap();
}

/// Read one query frame: token plus decoded JSON payload.
pub async fn read_frame(stream: &mut TcpStream) -> (u64, Value) {
    let mut header = [0u8; 12];
    stream.read_exact(&mut header).await.unwrap();
    let token = u64::from_le_bytes(header[..8].try_into().unwrap());
    let len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    (token, serde_json::from_slice(&payload).unwrap())
}

/// Write one response frame for the given token.
pub async fn write_response(stream: &mut TcpStream, token: u64, body: &Value) {
    let payload = body.to_string().into_bytes();
    stream.write_all(&token.to_le_bytes()).await.unwrap();
    stream
        .write_all(&(payload.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stream.write_all(&payload).await.unwrap();
    stream.flush().await.unwrap();
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
