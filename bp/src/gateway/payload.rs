//! Byte-budgeted batch request bodies

use crate::domain::Record;

use super::error::IngestError;

/// Length of `{"post":[],"patch":[]}`
const EMPTY_BODY_LEN: usize = 22;

/// One batch request body under construction
///
/// Items are kept pre-serialized so the body length is known exactly
/// before it is assembled.
#[derive(Debug, Default, Clone)]
pub struct BatchPayload {
    post: Vec<String>,
    patch: Vec<String>,

    /// Indices into the planned records, in body order
    members: Vec<usize>,
    len: usize,
}

impl BatchPayload {
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Exact length of the compact JSON body
    pub fn encoded_len(&self) -> usize {
        self.len
    }

    /// Indices of the records carried by this body
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    pub fn creates(&self) -> usize {
        self.post.len()
    }

    pub fn updates(&self) -> usize {
        self.patch.len()
    }

    /// Body length after adding an item of `item_len` bytes
    fn len_with(&self, is_create: bool, item_len: usize) -> usize {
        let list = if is_create { &self.post } else { &self.patch };
        let separator = usize::from(!list.is_empty());
        self.len + item_len + separator
    }

    fn push(&mut self, index: usize, is_create: bool, item: String) {
        self.len = self.len_with(is_create, item.len());
        if is_create {
            self.post.push(item);
        } else {
            self.patch.push(item);
        }
        self.members.push(index);
    }

    /// Assemble the body
    pub fn into_body(self) -> String {
        let mut body = String::with_capacity(self.len);
        body.push_str(r#"{"post":["#);
        body.push_str(&self.post.join(","));
        body.push_str(r#"],"patch":["#);
        body.push_str(&self.patch.join(","));
        body.push_str("]}");
        body
    }

    fn new() -> Self {
        Self {
            len: EMPTY_BODY_LEN,
            ..Default::default()
        }
    }
}

/// Result of splitting records into request bodies
#[derive(Debug, Default)]
pub struct ChunkPlan {
    pub payloads: Vec<BatchPayload>,

    /// Records that cannot fit the budget even alone, with their errors
    pub rejected: Vec<(usize, IngestError)>,
}

/// Split `records` into bodies of at most `limit` bytes
///
/// Creates are placed before updates and each kind keeps its order. A body
/// is closed as soon as the next item would push it past the budget.
pub fn plan_chunks(records: &[Record], limit: usize) -> Result<ChunkPlan, IngestError> {
    let mut plan = ChunkPlan::default();
    let mut current = BatchPayload::new();

    let creates = records.iter().enumerate().filter(|(_, r)| r.is_create());
    let updates = records.iter().enumerate().filter(|(_, r)| !r.is_create());

    for (index, record) in creates.chain(updates) {
        let item = serde_json::to_string(&record.to_wire())?;
        let is_create = record.is_create();

        let alone = BatchPayload::new().len_with(is_create, item.len());
        if alone > limit {
            plan.rejected.push((index, IngestError::PayloadTooLarge { size: alone, limit }));
            continue;
        }

        if current.len_with(is_create, item.len()) > limit {
            plan.payloads.push(std::mem::replace(&mut current, BatchPayload::new()));
        }
        current.push(index, is_create, item);
    }

    if !current.is_empty() {
        plan.payloads.push(current);
    }
    Ok(plan)
}
