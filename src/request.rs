//! `WorkItem`s dispatched across the message hub, and the fan-in shapes used to
//! correlate their completions back into a single reply.
//!
//! The back-reference from a `WorkItem` to its awaiting caller is realized here as
//! a plain `oneshot::Sender<WorkResult>`: the shard that completes
//! the item sends its result down the channel and forgets about it, and the
//! connection task that dispatched it holds the matching receiver. A "Request" with
//! more than one `WorkItem` (multi-key `get`) is simply an ordered `Vec` of those
//! receivers, awaited in wire order.

use tokio::sync::oneshot;

use crate::protocol::{StorageCommandResponse, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas { cas_unique: u64 },
    Incr { delta: u64 },
    Decr { delta: u64 },
}

/// A storage operation dispatched to the shard owning its key, carrying the payload
/// and a one-shot back-reference to the awaiting Request.
pub enum WorkItem {
    BtreeGet {
        key: String,
        reply: oneshot::Sender<WorkResult>,
    },
    BtreeSet {
        key: String,
        kind: SetKind,
        flags: u32,
        exp_time: u32,
        data: Vec<u8>,
        reply: oneshot::Sender<WorkResult>,
    },
    BtreeDelete {
        key: String,
        reply: oneshot::Sender<WorkResult>,
    },
}

impl WorkItem {
    pub fn key(&self) -> &str {
        match self {
            WorkItem::BtreeGet { key, .. } => key,
            WorkItem::BtreeSet { key, .. } => key,
            WorkItem::BtreeDelete { key, .. } => key,
        }
    }
}

/// Outcome of a numeric (incr/decr) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericResult {
    Ok(u64),
    NotFound,
    NotNumeric,
}

/// The result fields a shard fills in before handing a `WorkItem` back.
pub enum WorkResult {
    Value(Option<Value>),
    Stored(StorageCommandResponse),
    Deleted(bool),
    Numeric(NumericResult),
}

/// Await a set of per-key completions in the order the keys appeared on the wire.
/// If a shard is dropped before replying (e.g. during shutdown) the corresponding
/// slot is treated as a miss.
pub async fn await_in_order(
    receivers: Vec<oneshot::Receiver<WorkResult>>,
) -> Vec<Option<WorkResult>> {
    let mut out = Vec::with_capacity(receivers.len());
    for rx in receivers {
        out.push(rx.await.ok());
    }
    out
}
