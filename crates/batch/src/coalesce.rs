//! Exact-match request coalescing.
//!
//! Items whose payloads hash equal (over a key-sorted JSON encoding) are
//! merged: the first member of each group is dispatched, the rest are
//! parked as followers of that primary and receive its result.

use std::collections::HashMap;

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::WorkItem;

/// Content hash of a payload, independent of object key order.
pub type PayloadHash = [u8; 32];

/// A batch after coalescing.
#[derive(Debug, Default)]
pub struct CoalescedBatch {
    /// Items to send to the processor, in collection order.
    pub items: Vec<WorkItem>,
    /// Primary id → duplicates that must receive the primary's result.
    pub followers: HashMap<Uuid, Vec<WorkItem>>,
    /// Sizes of every group that had more than one member.
    pub merged_groups: Vec<usize>,
}

impl CoalescedBatch {
    /// Wrap an uncoalesced batch.
    pub fn passthrough(items: Vec<WorkItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    /// Number of followers across all groups.
    pub fn follower_count(&self) -> usize {
        self.followers.values().map(Vec::len).sum()
    }

    /// Total originating items (dispatched + followers).
    pub fn total_items(&self) -> usize {
        self.items.len() + self.follower_count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Hash a payload over its canonical encoding.
pub fn payload_hash(payload: &Value) -> PayloadHash {
    let mut buf = Vec::new();
    write_canonical(payload, &mut buf);
    Sha256::digest(&buf).into()
}

/// JSON encoding with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(Value::String(key.clone()).to_string().as_bytes());
                out.push(b':');
                write_canonical(val, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, val) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(val, out);
            }
            out.push(b']');
        }
        leaf => out.extend_from_slice(leaf.to_string().as_bytes()),
    }
}

/// Group a batch by payload hash, keeping the first member of each group.
///
/// Groups keep the position of their first member, so priority order is
/// preserved among the dispatched items.
pub fn coalesce(batch: Vec<WorkItem>) -> CoalescedBatch {
    let mut groups: Vec<Vec<WorkItem>> = Vec::new();
    let mut index: HashMap<PayloadHash, usize> = HashMap::new();

    for item in batch {
        let hash = payload_hash(&item.payload);
        match index.get(&hash) {
            Some(&slot) => groups[slot].push(item),
            None => {
                index.insert(hash, groups.len());
                groups.push(vec![item]);
            }
        }
    }

    let mut out = CoalescedBatch::default();
    for group in groups {
        let mut members = group.into_iter();
        let Some(primary) = members.next() else {
            continue;
        };
        let rest: Vec<WorkItem> = members.collect();
        if !rest.is_empty() {
            out.merged_groups.push(rest.len() + 1);
            out.followers.insert(primary.id, rest);
        }
        out.items.push(primary);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use serde_json::json;

    fn item(payload: Value, seq: u64) -> WorkItem {
        WorkItem::new(payload, Priority::Normal, seq).0
    }

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({"prompt": "hi", "opts": {"t": 0.1, "k": 5}});
        let b = json!({"opts": {"k": 5, "t": 0.1}, "prompt": "hi"});
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn hash_distinguishes_values() {
        assert_ne!(payload_hash(&json!({"a": 1})), payload_hash(&json!({"a": 2})));
        assert_ne!(payload_hash(&json!([1, 2])), payload_hash(&json!([2, 1])));
        assert_ne!(payload_hash(&json!("1")), payload_hash(&json!(1)));
    }

    #[test]
    fn unique_payloads_pass_through() {
        let batch = (0..4).map(|i| item(json!({ "i": i }), i)).collect();
        let out = coalesce(batch);
        assert_eq!(out.items.len(), 4);
        assert!(out.followers.is_empty());
        assert!(out.merged_groups.is_empty());
    }

    #[test]
    fn duplicates_keep_first_and_park_rest() {
        let batch = vec![
            item(json!({"q": "a"}), 0),
            item(json!({"q": "b"}), 1),
            item(json!({"q": "a"}), 2),
            item(json!({"q": "a"}), 3),
        ];
        let out = coalesce(batch);

        let seqs: Vec<u64> = out.items.iter().map(|i| i.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(out.merged_groups, vec![3]);
        assert_eq!(out.follower_count(), 2);
        assert_eq!(out.total_items(), 4);

        let primary = out.items[0].id;
        let follower_seqs: Vec<u64> = out.followers[&primary].iter().map(|i| i.seq).collect();
        assert_eq!(follower_seqs, vec![2, 3]);
    }

    #[test]
    fn groups_ordered_by_first_appearance() {
        let batch = vec![
            item(json!("x"), 0),
            item(json!("y"), 1),
            item(json!("y"), 2),
            item(json!("z"), 3),
            item(json!("x"), 4),
        ];
        let out = coalesce(batch);
        let seqs: Vec<u64> = out.items.iter().map(|i| i.seq).collect();
        assert_eq!(seqs, vec![0, 1, 3]);
        assert_eq!(out.merged_groups, vec![2, 2]);
    }
}
