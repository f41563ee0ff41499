//! End-to-end scenario: a single uncompressed `EVENT` followed by `EOSE`
//! reaches the output sink, and the client replies in kind to the relay's
//! close frame.

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
async fn uncompressed_single_event_reaches_the_sink() {
    let (client_read, mut server_write) = duplex(8192);
    let (mut server_read, client_write) = duplex(8192);
    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("events.jsonl");
    let config = test_config(vec![json!({"kinds": [1]})], 0, out_path.clone());
    let extensions = ExtensionState::default();
    let sink = EventSink::open(&config.output).await.unwrap();

    let server = tokio::spawn(async move {
        let (opcode, _, payload) = read_masked_frame(&mut server_read).await;
        assert_eq!(opcode, 0x1);
        let req: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(req[0], json!("REQ"));
        let sub_id = req[1].as_str().unwrap().to_owned();

        let event = json!(["EVENT", sub_id, {"id": "abc", "content": "hi"}]);
        server_write
            .write_all(&client_frame(0x1, false, serde_json::to_vec(&event).unwrap().as_slice()))
            .await
            .unwrap();
        let eose = json!(["EOSE", sub_id]);
        server_write
            .write_all(&client_frame(0x1, false, serde_json::to_vec(&eose).unwrap().as_slice()))
            .await
            .unwrap();

        // Expect the client's normal-closure close frame, then reply in kind.
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

    let contents = tokio::fs::read_to_string(&out_path).await.unwrap();
    let line: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(line["id"], json!("abc"));
}
