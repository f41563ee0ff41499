//! End-to-end scenario: the relay sends an `AUTH` challenge; the client
//! signs and replies with a kind-22242 event exactly once.

use std::path::PathBuf;

use nostr_deflate_client::config::{ConnectionConfig, OutputTarget, Scheme};
use nostr_deflate_client::driver;
use nostr_deflate_client::handshake::ExtensionState;
use nostr_deflate_client::sink::EventSink;
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

fn test_config(filters: Vec<Value>, keepalive_secs: u64, output: PathBuf) -> ConnectionConfig {
    ConnectionConfig {
        scheme: Scheme::Tls,
        hostname: "relay.example.com".to_owned(),
        port: 443,
        output: OutputTarget::File(output),
        keepalive_secs,
        filters,
    }
}

fn client_frame(opcode: u8, rsv1: bool, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(0x80 | (if rsv1 { 0x40 } else { 0 }) | opcode);
    if payload.len() < 126 {
        out.push(payload.len() as u8);
    } else {
        out.push(126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

async fn read_masked_frame(stream: &mut (impl AsyncReadExt + Unpin)) -> (u8, bool, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.unwrap();
    let opcode = head[0] & 0x0F;
    let rsv1 = head[0] & 0x40 != 0;
    let len7 = head[1] & 0x7F;
    let len = match len7 {
        126 => {
            let mut b = [0u8; 2];
            stream.read_exact(&mut b).await.unwrap();
            u16::from_be_bytes(b) as usize
        }
        n => n as usize,
    };
    let mut mask = [0u8; 4];
    stream.read_exact(&mut mask).await.unwrap();
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= mask[i % 4];
    }
    (opcode, rsv1, payload)
}

#[tokio::test]
async fn auth_challenge_gets_signed_reply_exactly_once() {
    let (client_read, mut server_write) = duplex(8192);
    let (mut server_read, client_write) = duplex(8192);
    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("events.jsonl");
    let config = test_config(vec![], 0, out_path.clone());
    let extensions = ExtensionState::default();
    let sink = EventSink::open(&config.output).await.unwrap();

    let server = tokio::spawn(async move {
        // Drain the REQ that would have been sent if filters were non-empty;
        // here there are none, so the first client frame is the auth reply.
        let auth = json!(["AUTH", "challenge-xyz"]);
        server_write
            .write_all(&client_frame(0x1, false, &serde_json::to_vec(&auth).unwrap()))
            .await
            .unwrap();

        let (opcode, _, payload) = read_masked_frame(&mut server_read).await;
        assert_eq!(opcode, 0x1);
        let reply: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(reply[0], json!("AUTH"));
        assert_eq!(reply[1]["kind"], json!(22242));
        let tags = reply[1]["tags"].as_array().unwrap();
        assert_eq!(tags[0], json!(["challenge", "challenge-xyz"]));

        let eose = json!(["EOSE", "s"]);
        server_write
            .write_all(&client_frame(0x1, false, &serde_json::to_vec(&eose).unwrap()))
            .await
            .unwrap();

        let (opcode, _, payload) = read_masked_frame(&mut server_read).await;
        assert_eq!(opcode, 0x8);
        server_write
            .write_all(&client_frame(0x8, false, &payload))
            .await
            .unwrap();
    });

    driver::run(&config, extensions, client_read, client_write, sink)
        .await
        .unwrap();
    server.await.unwrap();
}
