//! End-to-end scenario: between the two fragments of one compressed `EVENT`
//! message, the relay sends a ping with payload `"X"`. Expected: the client
//! replies with a masked pong carrying `"X"`, and the `EVENT` still decodes
//! to the identical object it would without the interleaved ping.

use std::path::PathBuf;

use nostr_deflate_client::compress::OutboundCompressor;
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

/// Builds one frame with explicit `fin`/`rsv1`, unmasked — matching how a
/// relay (server-to-client direction) actually sends frames.
fn server_frame(opcode: u8, rsv1: bool, fin: bool, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push((if fin { 0x80 } else { 0 }) | (if rsv1 { 0x40 } else { 0 }) | opcode);
    if payload.len() < 126 {
        out.push(payload.len() as u8);
    } else {
        out.push(126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

fn client_frame(opcode: u8, rsv1: bool, payload: &[u8]) -> Vec<u8> {
    server_frame(opcode, rsv1, true, payload)
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
async fn ping_between_event_fragments_does_not_disturb_reassembly() {
    let (client_read, mut server_write) = duplex(8192);
    let (mut server_read, client_write) = duplex(8192);
    let out_dir = tempfile::tempdir().unwrap();
    let out_path = out_dir.path().join("events.jsonl");
    let config = test_config(vec![], 0, out_path.clone());
    let extensions = ExtensionState {
        compression_active: true,
        server_no_context_takeover: false,
        client_no_context_takeover: false,
    };
    let sink = EventSink::open(&config.output).await.unwrap();

    let server = tokio::spawn(async move {
        let mut enc = OutboundCompressor::new(false);
        let event = json!(["EVENT", "s", {"id": "e1", "content": "split across fragments"}]);
        let compressed = enc
            .encode_message(&serde_json::to_vec(&event).unwrap())
            .unwrap();
        let split = compressed.len() / 2;
        let (first, second) = compressed.split_at(split.max(1));

        server_write
            .write_all(&server_frame(0x1, true, false, first))
            .await
            .unwrap();
        server_write
            .write_all(&server_frame(0x9, false, true, b"X"))
            .await
            .unwrap();
        server_write
            .write_all(&server_frame(0x0, false, true, second))
            .await
            .unwrap();

        let (opcode, _, payload) = read_masked_frame(&mut server_read).await;
        assert_eq!(opcode, 0xA); // pong
        assert_eq!(payload, b"X");

        let eose = json!(["EOSE", "s"]);
        let compressed_eose = enc
            .encode_message(&serde_json::to_vec(&eose).unwrap())
            .unwrap();
        server_write
            .write_all(&client_frame(0x1, true, &compressed_eose))
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

    let contents = tokio::fs::read_to_string(&out_path).await.unwrap();
    let line: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
    assert_eq!(line["id"], json!("e1"));
    assert_eq!(line["content"], json!("split across fragments"));
}
