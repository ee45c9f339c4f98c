//! Append-only log of accepted broadcast values.

use crate::id::Value;
use parking_lot::RwLock;

/// Every accepted broadcast's value, in acceptance order.
///
/// The store is not a set: two independent broadcasts carrying the same
/// number are both kept. Re-deliveries of one broadcast are filtered
/// earlier, by message id.
#[derive(Debug, Default)]
pub struct ValueStore {
    values: RwLock<Vec<Value>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value (the only mutation allowed).
    pub fn append(&self, value: Value) {
        self.values.write().push(value);
    }

    /// Copy of everything appended so far.
    pub fn snapshot(&self) -> Vec<Value> {
        self.values.read().clone()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}
