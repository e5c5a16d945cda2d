//! Token multiplexing: several queries in flight on one socket, replies
//! delivered out of order.
//!
//! Kept as the only test in this binary so the token sequence starting
//! at the seed is observable.

mod common;

use reql_client::{Connection, Datum, QueryResponse};
use serde_json::json;

#[tokio::test]
async fn test_three_queries_multiplexed_out_of_order() {
    let server = common::MockServer::bind().await;
    let url = server.url();

    let server_task = tokio::spawn(async move {
        let mut stream = server.accept().await;
        common::serve_handshake_v1(&mut stream, "admin", "").await;

        let mut frames = Vec::new();
        for _ in 0..3 {
            let (token, payload) = common::read_frame(&mut stream).await;
            assert_eq!(payload[0], 1, "expected a START frame");
            frames.push((token, payload[1].as_i64().unwrap()));
        }

        let mut tokens: Vec<u64> = frames.iter().map(|(t, _)| *t).collect();
        tokens.sort_unstable();
        assert_eq!(
            tokens,
            vec![
                common::TOKEN_SEED,
                common::TOKEN_SEED + 1,
                common::TOKEN_SEED + 2
            ]
        );

        // Answer in reverse arrival order to exercise demultiplexing.
        for (token, term) in frames.into_iter().rev() {
            common::write_response(&mut stream, token, &json!({"t": 1, "r": [term]})).await;
        }
        stream
    });

    let conn = Connection::connect(&url).await.unwrap();
    let (r1, r2, r3) = tokio::join!(
        conn.run(b"[1,1]"),
        conn.run(b"[1,2]"),
        conn.run(b"[1,3]")
    );

    for (result, expected) in [(r1, 1), (r2, 2), (r3, 3)] {
        match result.unwrap() {
            QueryResponse::Value(datum) => assert_eq!(datum, Datum::Int(expected)),
            other => panic!("expected atom, got {other:?}"),
        }
    }

    let _stream = server_task.await.unwrap();
    conn.close().await;
}
