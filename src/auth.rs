//! NIP-42-style auth sub-protocol: on the connection's first `AUTH`
//! challenge, mint a throwaway keypair, sign a kind-22242 event binding the
//! challenge and the connection's origin, and reply.

use std::sync::atomic::{AtomicBool, Ordering};

use secp256k1::{rand, Keypair, Secp256k1};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

const AUTH_EVENT_KIND: u64 = 22242;

/// Guards the "at most once per connection" rule across concurrent
/// dispatch of `AUTH` messages; a single-threaded dispatcher only ever
/// needs this to be `bool`, but the atomic makes the invariant robust if
/// the dispatcher is ever split across tasks.
#[derive(Default)]
pub struct AuthOnceGuard(AtomicBool);

impl AuthOnceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time it is called, `false` on every
    /// subsequent call.
    pub fn should_respond(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Builds and signs the `["AUTH", signed_event]` reply for `challenge`,
/// generating a fresh ephemeral keypair bound to nothing beyond this call.
pub fn build_auth_reply(challenge: &str, origin: &str) -> Result<Value, AuthError> {
    let secp = Secp256k1::new();
    let keypair = Keypair::new(&secp, &mut rand::thread_rng());
    let (xonly_pubkey, _parity) = keypair.x_only_public_key();
    let pubkey_hex = hex::encode(xonly_pubkey.serialize());

    let created_at = current_unix_time();
    let tags = json!([["challenge", challenge], ["relay", origin]]);
    let content = "";

    let serialized = json!([0, pubkey_hex, created_at, AUTH_EVENT_KIND, tags, content]);
    let serialized_bytes = serde_json::to_vec(&serialized)
        .map_err(|e| AuthError::Signing(format!("failed to serialize event for id: {e}")))?;
    let id = Sha256::digest(&serialized_bytes);
    let id_hex = hex::encode(id);

    let message = secp256k1::Message::from_digest_slice(&id)
        .map_err(|e| AuthError::Signing(format!("event id was not a valid digest: {e}")))?;
    let signature = secp.sign_schnorr_with_rng(&message, &keypair, &mut rand::thread_rng());

    Ok(json!([
        "AUTH",
        {
            "id": id_hex,
            "pubkey": pubkey_hex,
            "created_at": created_at,
            "kind": AUTH_EVENT_KIND,
            "tags": tags,
            "content": content,
            "sig": hex::encode(signature.as_ref()),
        }
    ]))
}

fn current_unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}
