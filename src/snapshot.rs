//! The process-wide tag snapshot (spec §4.1). Owned exclusively by the scan
//! loop task — per §5's single-writer rule, no lock is needed. The HTTP
//! adapter observes it through a `watch` channel snapshot clone, never
//! through shared mutable access.

use crate::error::RtdsError;
use crate::model::{Tag, TagValue};
use std::collections::HashMap;
use tokio::sync::mpsc;

#[cfg(test)]
mod tests;

/// Keyed store of tags, plus the wiring `set()` needs to route a write back
/// to the owning connector or apply it locally and gate it into the store
/// pipeline.
pub struct Snapshot {
    tags: HashMap<String, Tag>,
    /// Per-connector write queues, registered by connector name. Only
    /// connectors constructed with `is_read_only == false` have one.
    write_queues: HashMap<String, mpsc::Sender<TagValue>>,
    /// Sender into the store pipeline; every `is_log` tag change is pushed
    /// here after a local apply.
    store_tx: mpsc::Sender<TagValue>,
}

impl Snapshot {
    pub fn new(store_tx: mpsc::Sender<TagValue>) -> Self {
        Self {
            tags: HashMap::new(),
            write_queues: HashMap::new(),
            store_tx,
        }
    }

    /// Register a connector's write queue so that `set()` on tags it owns
    /// routes through the connector instead of applying locally.
    pub fn register_write_queue(&mut self, connector_name: &str, tx: mpsc::Sender<TagValue>) {
        self.write_queues.insert(connector_name.to_string(), tx);
    }

    pub fn clear_write_queues(&mut self) {
        self.write_queues.clear();
    }

    /// Register by unique name; duplicates overwrite (spec §4.1 `add`).
    pub fn add(&mut self, tag: Tag) {
        self.tags.insert(tag.name.clone(), tag);
    }

    /// Return a value-copy, or `None` if the tag doesn't exist or hasn't
    /// been written yet.
    pub fn get(&self, name: &str) -> Option<TagValue> {
        self.tags.get(name).and_then(Tag::to_tag_value)
    }

    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn names_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tags.keys().cloned().collect();
        names.sort();
        names
    }

    /// A read-only value-copy of every tag with a current value, for
    /// scripts' `get()` calls (spec §4.6) — built once per scan cycle,
    /// never a live borrow into `self`.
    pub fn view(&self) -> HashMap<String, TagValue> {
        self.tags
            .iter()
            .filter_map(|(name, tag)| tag.to_tag_value().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Replace every registered tag (used by RELOAD — spec §4.5). Write
    /// queues are not touched here; the caller clears and re-registers them
    /// as it rebuilds connectors.
    pub fn reset_tags(&mut self, tags: Vec<Tag>) {
        self.tags.clear();
        for tag in tags {
            self.add(tag);
        }
    }

    /// spec §4.1 `set(TagValue v)`: if the tag is owned by a connector with
    /// a write queue, enqueue there (invariant 5 — never write to a tag the
    /// calling connector doesn't own is enforced by the connector only
    /// enqueueing its own tags in the first place); otherwise apply locally.
    pub async fn set(&mut self, v: TagValue) -> Result<(), RtdsError> {
        let connector_name = match self.tags.get(&v.name) {
            Some(t) => t.connector_name.clone(),
            None => {
                return Err(RtdsError::schema(format!(
                    "set() on unknown tag: {}",
                    v.name
                )))
            }
        };

        if let Some(name) = connector_name {
            if let Some(tx) = self.write_queues.get(&name) {
                if tx.send(v).await.is_err() {
                    tracing::warn!(connector = %name, "write queue closed, applying locally");
                } else {
                    return Ok(());
                }
            }
        }

        self.apply(v).await
    }

    /// Internal `_set`: clamp, store, and — if `is_log` — push onto the
    /// store channel. This is the only path that mutates tag volatile state.
    pub async fn apply(&mut self, v: TagValue) -> Result<(), RtdsError> {
        let tag = self
            .tags
            .get_mut(&v.name)
            .ok_or_else(|| RtdsError::schema(format!("apply() on unknown tag: {}", v.name)))?;

        if v.tag_type() != tag.tag_type {
            return Err(RtdsError::schema(format!(
                "tag {} expected type {:?}, got {:?}",
                v.name,
                tag.tag_type,
                v.tag_type()
            )));
        }

        let is_log = tag.is_log;
        let stored = tag.clamp_and_store(v.value, v.status);

        if is_log {
            // Bounded store channel: backpressure policy is drop-newest with
            // an error metric (spec §9), never block the scan loop.
            if let Err(e) = self.store_tx.try_send(stored) {
                tracing::error!(tag = %v.name, "store channel full, dropping value: {e}");
            }
        }

        Ok(())
    }
}
