//! Buffered records and their completion handles

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::Record;
use crate::gateway::IngestError;

/// How an appended record left the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Included in a transmission the endpoint accepted
    Sent,

    /// Rejected by sampling before it reached the buffer
    SampledOut,
}

/// Why a record was not delivered
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    #[error("Delivery failed: {0}")]
    Delivery(Arc<IngestError>),

    #[error("Batch accumulator closed")]
    Closed,
}

pub type Outcome = Result<Delivery, BatchError>;

/// A buffered record and everyone waiting on it
#[derive(Debug)]
pub struct BatchItem {
    pub record: Record,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

impl BatchItem {
    pub(crate) fn new(record: Record, waiter: oneshot::Sender<Outcome>) -> Self {
        Self {
            record,
            waiters: vec![waiter],
        }
    }

    /// Number of handles this item will resolve
    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Resolve every waiter with `outcome`
    pub fn resolve(self, outcome: Outcome) {
        resolve_all(self.waiters, outcome);
    }

    pub(crate) fn into_parts(self) -> (Record, Vec<oneshot::Sender<Outcome>>) {
        (self.record, self.waiters)
    }

    fn absorb(&mut self, other: BatchItem) {
        self.record.absorb(other.record);
        self.waiters.extend(other.waiters);
    }
}

pub(crate) fn resolve_all(waiters: Vec<oneshot::Sender<Outcome>>, outcome: Outcome) {
    for waiter in waiters {
        // Receiver dropped means nobody is listening
        let _ = waiter.send(outcome.clone());
    }
}

/// Merge each update into a create for the same id earlier in `items`
///
/// The merged item keeps the create's position and resolves the waiters of
/// both. Updates without a matching create keep their own position.
pub fn merge_pairs(items: Vec<BatchItem>) -> Vec<BatchItem> {
    let mut merged: Vec<BatchItem> = Vec::with_capacity(items.len());
    let mut creates = std::collections::HashMap::new();

    for item in items {
        if item.record.is_create() {
            creates.insert(item.record.id.clone(), merged.len());
            merged.push(item);
        } else if let Some(&index) = creates.get(&item.record.id) {
            merged[index].absorb(item);
        } else {
            merged.push(item);
        }
    }
    merged
}

/// Resolves once the record is delivered, sampled out or abandoned
#[derive(Debug)]
pub struct ItemHandle {
    inner: HandleInner,
}

#[derive(Debug)]
enum HandleInner {
    Ready(Option<Outcome>),
    Waiting(oneshot::Receiver<Outcome>),
}

impl ItemHandle {
    /// Handle that is already resolved
    pub fn ready(outcome: Outcome) -> Self {
        Self {
            inner: HandleInner::Ready(Some(outcome)),
        }
    }

    pub(crate) fn waiting(rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            inner: HandleInner::Waiting(rx),
        }
    }
}

impl Future for ItemHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            HandleInner::Ready(outcome) => Poll::Ready(outcome.take().unwrap_or(Err(BatchError::Closed))),
            HandleInner::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(BatchError::Closed))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RecordKind;
    use proptest::prelude::*;
    use serde_json::json;

    fn item(record: Record) -> (BatchItem, ItemHandle) {
        let (tx, rx) = oneshot::channel();
        (BatchItem::new(record, tx), ItemHandle::waiting(rx))
    }

    #[tokio::test]
    async fn test_merge_pair_resolves_both_waiters() {
        let (create, create_handle) = item(Record::create("a", json!({"status": "started"})));
        let (update, update_handle) = item(Record::update("a", json!({"status": "done"})));

        let mut merged = merge_pairs(vec![create, update]);
        assert_eq!(merged.len(), 1);
        let only = merged.remove(0);
        assert_eq!(only.record.kind, RecordKind::Create);
        assert_eq!(only.record.payload["status"], "done");
        assert_eq!(only.waiters(), 2);

        only.resolve(Ok(Delivery::Sent));
        assert_eq!(create_handle.await.unwrap(), Delivery::Sent);
        assert_eq!(update_handle.await.unwrap(), Delivery::Sent);
    }

    #[test]
    fn test_merge_keeps_create_position() {
        let items = vec![
            item(Record::create("a", json!({}))).0,
            item(Record::create("b", json!({}))).0,
            item(Record::update("c", json!({}))).0,
            item(Record::update("a", json!({"x": 1}))).0,
        ];
        let merged = merge_pairs(items);
        let ids: Vec<_> = merged.iter().map(|i| (i.record.id.as_str(), i.record.kind)).collect();
        assert_eq!(
            ids,
            vec![
                ("a", RecordKind::Create),
                ("b", RecordKind::Create),
                ("c", RecordKind::Update)
            ]
        );
        assert_eq!(merged[0].record.payload["x"], 1);
    }

    #[test]
    fn test_update_before_create_is_not_merged() {
        let items = vec![
            item(Record::update("a", json!({}))).0,
            item(Record::create("a", json!({}))).0,
        ];
        assert_eq!(merge_pairs(items).len(), 2);
    }

    #[tokio::test]
    async fn test_ready_handle() {
        let handle = ItemHandle::ready(Ok(Delivery::SampledOut));
        assert_eq!(handle.await.unwrap(), Delivery::SampledOut);
    }

    #[tokio::test]
    async fn test_dropped_item_resolves_closed() {
        let (batch_item, handle) = item(Record::create("a", json!({})));
        drop(batch_item);
        assert!(matches!(handle.await, Err(BatchError::Closed)));
    }

    proptest! {
        #[test]
        fn merge_preserves_relative_order(ops in prop::collection::vec((0u8..6, any::<bool>()), 0..40)) {
            let items: Vec<_> = ops
                .iter()
                .enumerate()
                .map(|(seq, (id, is_create))| {
                    let id = format!("r{id}");
                    let record = if *is_create {
                        Record::create(id, json!({"create_seq": seq}))
                    } else {
                        Record::update(id, json!({"update_seq": seq}))
                    };
                    item(record).0
                })
                .collect();
            let total_waiters = items.len();

            let merged = merge_pairs(items);
            prop_assert_eq!(merged.iter().map(|i| i.waiters()).sum::<usize>(), total_waiters);

            let positions: Vec<u64> = merged
                .iter()
                .map(|i| {
                    let key = if i.record.is_create() { "create_seq" } else { "update_seq" };
                    i.record.payload[key].as_u64().unwrap()
                })
                .collect();
            prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
