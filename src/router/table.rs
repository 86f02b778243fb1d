//! Reference-counted subscription table

use super::types::{SubscriptionKey, SubscriptionRecord};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of releasing one reference
#[derive(Debug)]
pub enum Release {
    /// Key was never subscribed (or already released)
    NotFound,
    /// Still referenced by other consumers
    Remaining(usize),
    /// Last reference gone; the record is returned for the wire unsubscribe
    Removed(SubscriptionRecord),
}

/// Map from canonical key to reference count; entries disappear at zero
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: HashMap<SubscriptionKey, SubscriptionRecord>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reference; returns the new count (1 means first subscriber)
    pub fn acquire(&mut self, key: &SubscriptionKey, params: &Value) -> usize {
        let record = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| SubscriptionRecord {
                params: params.clone(),
                ref_count: 0,
                wire_id: None,
            });
        record.ref_count += 1;
        record.ref_count
    }

    pub fn release(&mut self, key: &SubscriptionKey) -> Release {
        let Some(record) = self.entries.get_mut(key) else {
            return Release::NotFound;
        };
        record.ref_count = record.ref_count.saturating_sub(1);
        if record.ref_count > 0 {
            return Release::Remaining(record.ref_count);
        }
        match self.entries.remove(key) {
            Some(record) => Release::Removed(record),
            None => Release::NotFound,
        }
    }

    pub fn set_wire_id(&mut self, key: &SubscriptionKey, wire_id: i64) -> bool {
        match self.entries.get_mut(key) {
            Some(record) => {
                record.wire_id = Some(wire_id);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<&SubscriptionRecord> {
        self.entries.get(key)
    }

    pub fn ref_count(&self, key: &SubscriptionKey) -> usize {
        self.entries.get(key).map_or(0, |r| r.ref_count)
    }

    /// Remove every entry regardless of count
    pub fn drain(&mut self) -> Vec<(SubscriptionKey, SubscriptionRecord)> {
        self.entries.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
