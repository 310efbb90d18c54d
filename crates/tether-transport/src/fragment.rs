//! Fragment codec
//!
//! The broker limits message size, so a serialized envelope travels as one or
//! more fragments `{id, index, count, data}`, each carrying at most
//! [`FRAGMENT_SIZE`] characters of the original JSON. All fragments of one
//! envelope share a random id.

use crate::envelope::Envelope;
use crate::error::TransportError;
use serde::{Deserialize, Serialize};

/// Maximum number of characters carried by one fragment
pub const FRAGMENT_SIZE: usize = 50_000;

/// A size-bounded slice of a serialized envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Fragment-set id shared by all slices of one envelope
    pub id: String,
    /// Position of this slice, starting at zero
    pub index: u32,
    /// Number of slices in the set
    pub count: u32,
    /// Slice content
    pub data: String,
}

/// Wire form before validation; every field may be missing
#[derive(Debug, Deserialize)]
struct RawFragment {
    id: Option<String>,
    index: Option<u32>,
    count: Option<u32>,
    data: Option<String>,
}

impl Fragment {
    /// Decode and validate one fragment received from the broker
    ///
    /// # Errors
    /// - `TransportError::InvalidFragment` for non-JSON input, a missing or
    ///   empty id, a zero count or an index outside `0..count`
    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let raw: RawFragment = serde_json::from_slice(bytes)
            .map_err(|e| TransportError::InvalidFragment(format!("not a fragment: {e}")))?;

        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TransportError::InvalidFragment("missing fragment id".to_string()))?;
        let count = raw
            .count
            .filter(|c| *c > 0)
            .ok_or_else(|| TransportError::InvalidFragment(format!("fragment {id}: bad count")))?;
        let index = raw
            .index
            .filter(|i| *i < count)
            .ok_or_else(|| TransportError::InvalidFragment(format!("fragment {id}: bad index")))?;

        Ok(Self {
            id,
            index,
            count,
            data: raw.data.unwrap_or_default(),
        })
    }

    /// Encode for publishing
    ///
    /// # Errors
    /// - `TransportError::Serialization` (cannot happen for valid UTF-8 data)
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Split serialized JSON into fragments of at most `max_chars` characters
///
/// Splits on character boundaries, never inside a UTF-8 sequence. An empty
/// input yields a single empty fragment so the receiver still sees a
/// complete set.
#[must_use]
pub fn split_json(json: &str, max_chars: usize) -> Vec<Fragment> {
    let max_chars = max_chars.max(1);
    let id = uuid::Uuid::new_v4().to_string();

    let mut parts: Vec<&str> = Vec::new();
    let mut start = 0;
    let mut chars = 0;
    for (offset, _) in json.char_indices() {
        if chars == max_chars {
            parts.push(&json[start..offset]);
            start = offset;
            chars = 0;
        }
        chars += 1;
    }
    if start < json.len() || parts.is_empty() {
        parts.push(&json[start..]);
    }

    let count = u32::try_from(parts.len()).unwrap_or(u32::MAX);
    parts
        .into_iter()
        .zip(0u32..)
        .map(|(part, index)| Fragment {
            id: id.clone(),
            index,
            count,
            data: part.to_string(),
        })
        .collect()
}

/// Serialize an envelope and split it into wire fragments
///
/// # Errors
/// - `TransportError::Serialization` if the envelope cannot be serialized
pub fn split_envelope(envelope: &Envelope) -> Result<Vec<Fragment>, TransportError> {
    let json = envelope.to_json()?;
    Ok(split_json(&json, FRAGMENT_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(fragments: &[Fragment]) -> String {
        fragments.iter().map(|f| f.data.as_str()).collect()
    }

    #[test]
    fn boundary_sizes_round_trip() {
        for size in [0usize, 49_999, 50_000, 50_001, 250_000] {
            let json = "x".repeat(size);
            let fragments = split_json(&json, FRAGMENT_SIZE);

            let expected = size.div_ceil(FRAGMENT_SIZE).max(1);
            assert_eq!(fragments.len(), expected, "size {size}");
            assert!(fragments.iter().all(|f| f.data.chars().count() <= FRAGMENT_SIZE));
            assert!(fragments.iter().all(|f| f.count as usize == expected));
            assert_eq!(join(&fragments), json, "size {size}");
        }
    }

    #[test]
    fn fragments_share_id_and_are_indexed() {
        let fragments = split_json(&"y".repeat(120), 50);
        assert_eq!(fragments.len(), 3);
        assert!(fragments.iter().all(|f| f.id == fragments[0].id));
        let indices: Vec<u32> = fragments.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn split_respects_multibyte_characters() {
        let json = "é".repeat(7);
        let fragments = split_json(&json, 3);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].data, "ééé");
        assert_eq!(fragments[2].data, "é");
        assert_eq!(join(&fragments), json);
    }

    #[test]
    fn distinct_envelopes_get_distinct_ids() {
        let a = split_json("{}", FRAGMENT_SIZE);
        let b = split_json("{}", FRAGMENT_SIZE);
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn decode_rejects_missing_id() {
        let err = Fragment::decode(br#"{"index":0,"count":1,"data":"{}"}"#).unwrap_err();
        assert!(matches!(err, TransportError::InvalidFragment(_)));
    }

    #[test]
    fn decode_rejects_index_out_of_range() {
        let err = Fragment::decode(br#"{"id":"a","index":2,"count":2,"data":""}"#).unwrap_err();
        assert!(matches!(err, TransportError::InvalidFragment(_)));
    }

    #[test]
    fn decode_rejects_zero_count() {
        let err = Fragment::decode(br#"{"id":"a","index":0,"count":0,"data":""}"#).unwrap_err();
        assert!(matches!(err, TransportError::InvalidFragment(_)));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = Fragment::decode(b"not json").unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn encode_decode_preserves_fragment() {
        let fragment = split_json("{\"a\":1}", FRAGMENT_SIZE).remove(0);
        let decoded = Fragment::decode(&fragment.encode().unwrap()).unwrap();
        assert_eq!(decoded, fragment);
    }
}
