//! Message Dispatcher: classifies one decoded top-level JSON array by the
//! first two characters of its tag string and turns it into an action the
//! driver can act on. Classification is pure and synchronous; the driver
//! owns all the side effects (sink writes, auth replies, closing the
//! outbound pipe).

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    Event {
        subscription_id: String,
        event: Value,
    },
    Eose {
        subscription_id: String,
    },
    Notice {
        text: String,
    },
    Ok {
        event_id: String,
        accepted: bool,
        reason: String,
    },
    Auth {
        challenge: String,
    },
    /// Tags outside the protocol vocabulary used here are ignored.
    Unknown,
}

/// Classifies a decoded message in place. Borrows mutably only so the
/// `EVENT` case can `pop()` its payload out without cloning; every other
/// field is copied out as an owned `String`/`bool` so the caller can
/// return the same backing `Vec` to the reuse pool afterward.
pub fn classify(message: &mut Vec<Value>) -> Result<DispatchAction, DispatchError> {
    if message.is_empty() {
        return Err(DispatchError::EmptyMessage);
    }
    let tag = message[0]
        .as_str()
        .ok_or(DispatchError::TagNotString)?
        .to_owned();
    let prefix = &tag.as_bytes()[..tag.len().min(2)];

    let action = match prefix {
        b"EV" => {
            let event = message.pop().unwrap_or(Value::Null);
            let subscription_id = message
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            DispatchAction::Event {
                subscription_id,
                event,
            }
        }
        b"EO" => DispatchAction::Eose {
            subscription_id: message
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
        b"NO" => DispatchAction::Notice {
            text: message
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
        b"OK" => DispatchAction::Ok {
            event_id: message
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            accepted: message.get(2).and_then(Value::as_bool).unwrap_or(false),
            reason: message
                .get(3)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
        b"AU" => DispatchAction::Auth {
            challenge: message
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        },
        _ => DispatchAction::Unknown,
    };

    Ok(action)
}

/// A small free-list standing in for a `sync.Pool` of decoded-message
/// buffers. `Vec<Value>` allocations are cheap enough here that this is
/// mostly about matching the reuse lifecycle the data model calls for,
/// not about shaving allocator pressure.
#[derive(Default)]
pub struct MessagePool {
    free: Mutex<Vec<Vec<Value>>>,
}

impl MessagePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn take(&self) -> Vec<Value> {
        let mut free = self.free.lock().await;
        free.pop().unwrap_or_default()
    }

    pub async fn release(&self, mut message: Vec<Value>) {
        message.clear();
        let mut free = self.free.lock().await;
        free.push(message);
    }
}
