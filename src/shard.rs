//! One task per shard, each owning its own `Store` exclusively, plus the message hub
//! that routes `WorkItem`s to the shard that owns their key.

use std::hash::{DefaultHasher, Hash, Hasher};

use tokio::sync::mpsc;
use tracing::trace;

use crate::request::{NumericResult, SetKind, WorkItem, WorkResult};
use crate::store::Store;

/// Inbound channel depth per shard before a dispatching connection task starts
/// waiting on back-pressure.
const SHARD_CHANNEL_CAPACITY: usize = 1024;

/// A single-consumer task owning one partition of the key space. No locking is used
/// inside `run` because only this task ever calls into `store`.
struct Shard {
    rx: mpsc::Receiver<WorkItem>,
    store: Store,
}

impl Shard {
    async fn run(mut self) {
        while let Some(item) = self.rx.recv().await {
            self.handle(item).await;
        }
    }

    async fn handle(&mut self, item: WorkItem) {
        match item {
            WorkItem::BtreeGet { key, reply } => {
                let value = self.store.get(&key).await;
                let _ = reply.send(WorkResult::Value(value));
            }
            WorkItem::BtreeDelete { key, reply } => {
                let found = self.store.delete(&key).await;
                let _ = reply.send(WorkResult::Deleted(found));
            }
            WorkItem::BtreeSet {
                key,
                kind,
                flags,
                exp_time,
                data,
                reply,
            } => {
                let result = match kind {
                    SetKind::Set => WorkResult::Stored(self.store.set(key, flags, exp_time, data).await),
                    SetKind::Add => WorkResult::Stored(self.store.add(key, flags, exp_time, data).await),
                    SetKind::Replace => {
                        WorkResult::Stored(self.store.replace(key, flags, exp_time, data).await)
                    }
                    SetKind::Append => {
                        WorkResult::Stored(self.store.append(key, flags, exp_time, data).await)
                    }
                    SetKind::Prepend => {
                        WorkResult::Stored(self.store.prepend(key, flags, exp_time, data).await)
                    }
                    SetKind::Cas { cas_unique } => {
                        WorkResult::Stored(self.store.cas(key, flags, exp_time, data, cas_unique).await)
                    }
                    SetKind::Incr { delta } => {
                        WorkResult::Numeric(self.store.arithmetic(&key, delta, true).await)
                    }
                    SetKind::Decr { delta } => {
                        WorkResult::Numeric(self.store.arithmetic(&key, delta, false).await)
                    }
                };
                let _ = reply.send(result);
            }
        }
    }
}

/// The message hub: one bounded channel per shard, plus the key->shard hash. Cheap
/// to clone - each connection task holds its own handle to the same shard set.
#[derive(Clone)]
pub struct Hub {
    senders: Vec<mpsc::Sender<WorkItem>>,
}

impl Hub {
    /// Spawn `n_shards` shard tasks, each with its own `Store` capped at
    /// `shard_capacity_bytes`, and return the hub that routes to them.
    pub fn spawn(n_shards: usize, shard_capacity_bytes: u64) -> Hub {
        assert!(n_shards > 0, "need at least one shard");
        let mut senders = Vec::with_capacity(n_shards);
        for id in 0..n_shards {
            let (tx, rx) = mpsc::channel(SHARD_CHANNEL_CAPACITY);
            let shard = Shard {
                rx,
                store: Store::new(shard_capacity_bytes),
            };
            tokio::spawn(async move {
                trace!(shard = id, "shard task started");
                shard.run().await;
            });
            senders.push(tx);
        }
        Hub { senders }
    }

    fn index_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Submit a `WorkItem` to the shard that owns its key. Waits for channel
    /// capacity under back-pressure rather than dropping or erroring.
    pub async fn submit(&self, item: WorkItem) {
        let idx = self.index_for(item.key());
        // The shard task only exits if the process is shutting down, in which case
        // dropping the item (and thus its reply sender) is the correct behavior:
        // the awaiting connection task observes a closed channel and treats it as a
        // miss rather than hanging.
        let _ = self.senders[idx].send(item).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn routes_same_key_to_same_shard() {
        let hub = Hub::spawn(4, 1024 * 1024);

        let (tx, rx) = oneshot::channel();
        hub.submit(WorkItem::BtreeSet {
            key: "k".into(),
            kind: SetKind::Set,
            flags: 0,
            exp_time: 0,
            data: b"v".to_vec(),
            reply: tx,
        })
        .await;
        assert!(matches!(rx.await.unwrap(), WorkResult::Stored(_)));

        let (tx, rx) = oneshot::channel();
        hub.submit(WorkItem::BtreeGet { key: "k".into(), reply: tx }).await;
        match rx.await.unwrap() {
            WorkResult::Value(Some(v)) => assert_eq!(v.data, b"v"),
            other => panic!("unexpected result reaching shard: {:?}", matches!(other, WorkResult::Value(_))),
        }
    }

    #[tokio::test]
    async fn incr_on_missing_key_is_not_found() {
        let hub = Hub::spawn(2, 1024 * 1024);
        let (tx, rx) = oneshot::channel();
        hub.submit(WorkItem::BtreeSet {
            key: "counter".into(),
            kind: SetKind::Incr { delta: 1 },
            flags: 0,
            exp_time: 0,
            data: Vec::new(),
            reply: tx,
        })
        .await;
        assert!(matches!(rx.await.unwrap(), WorkResult::Numeric(NumericResult::NotFound)));
    }
}
