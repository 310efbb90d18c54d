//! Reassembly buffer for inbound fragments
//!
//! Keeps one partial buffer per fragment-set id. A set is complete once
//! `count` distinct indices have arrived; the slices are concatenated in index
//! order and the buffer entry is removed. Completed ids are remembered for a
//! while so a replayed fragment of an already delivered set is dropped instead
//! of starting a new buffer.

use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::fragment::Fragment;
use moka::sync::Cache;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// How long a completed fragment-set id is remembered
pub const COMPLETED_TTL: Duration = Duration::from_secs(300);

/// Upper bound on remembered completed ids
const COMPLETED_CAPACITY: u64 = 10_000;

#[derive(Debug)]
struct PartialSet {
    count: u32,
    slices: BTreeMap<u32, String>,
}

/// Reassembles fragment sets into serialized envelopes
pub struct Reassembler {
    pending: HashMap<String, PartialSet>,
    completed: Cache<String, ()>,
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembler")
            .field("pending", &self.pending.len())
            .field("completed", &self.completed.entry_count())
            .finish()
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Create an empty reassembler
    #[must_use]
    pub fn new() -> Self {
        Self::with_completed_ttl(COMPLETED_TTL)
    }

    /// Create a reassembler with a custom memory for completed ids
    #[must_use]
    pub fn with_completed_ttl(ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            completed: Cache::builder()
                .max_capacity(COMPLETED_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Record one fragment
    ///
    /// Returns the full serialized JSON when this fragment completes its set,
    /// `None` while the set is still partial or when the set was already
    /// delivered.
    ///
    /// # Errors
    /// - `TransportError::InvalidFragment` if the fragment disagrees with the
    ///   `count` of earlier fragments of the same set
    pub fn accept(&mut self, fragment: Fragment) -> Result<Option<String>, TransportError> {
        if self.completed.contains_key(&fragment.id) {
            tracing::debug!(fragment_set = %fragment.id, "Dropping fragment of delivered set");
            return Ok(None);
        }

        let partial = self
            .pending
            .entry(fragment.id.clone())
            .or_insert_with(|| PartialSet {
                count: fragment.count,
                slices: BTreeMap::new(),
            });

        if partial.count != fragment.count {
            return Err(TransportError::InvalidFragment(format!(
                "fragment {}: count {} disagrees with {}",
                fragment.id, fragment.count, partial.count
            )));
        }

        partial.slices.insert(fragment.index, fragment.data);
        if partial.slices.len() < partial.count as usize {
            return Ok(None);
        }

        let Some(complete) = self.pending.remove(&fragment.id) else {
            return Ok(None);
        };
        self.completed.insert(fragment.id, ());
        Ok(Some(complete.slices.into_values().collect()))
    }

    /// Decode a raw broker message and, if it completes a set, the envelope
    ///
    /// # Errors
    /// - `TransportError::InvalidFragment` for malformed fragments
    /// - `TransportError::Serialization` if the reassembled JSON is not an envelope
    pub fn accept_bytes(&mut self, bytes: &[u8]) -> Result<Option<Envelope>, TransportError> {
        let fragment = Fragment::decode(bytes)?;
        match self.accept(fragment)? {
            Some(json) => Ok(Some(Envelope::from_json(&json)?)),
            None => Ok(None),
        }
    }

    /// Number of partially received sets
    #[inline]
    #[must_use]
    pub fn pending_sets(&self) -> usize {
        self.pending.len()
    }
}
