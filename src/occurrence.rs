use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;

/// One labeled match reported by a miner.
///
/// Every occurrence owns a copy of its matched bytes; a batch handed out by
/// the engine shares no storage with the stream or with other batches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    pub position: u64,
    pub length: usize,
    pub label: String,
    #[serde(serialize_with = "serialize_lossy")]
    pub value: Vec<u8>,
    pub confidence: f32,
}

/// Owned result of one `next` call.
pub type Batch = Vec<Occurrence>;

impl Occurrence {
    /// Offset one past the last matched byte.
    pub fn end(&self) -> u64 {
        self.position + self.length as u64
    }

    pub fn value_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{} {} {:?} ({:.2})",
            self.position,
            self.length,
            self.label,
            self.value_str(),
            self.confidence
        )
    }
}

fn serialize_lossy<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(value))
}

/// Occurrence tagged with the registration index of the miner that found it.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub occurrence: Occurrence,
    pub miner_index: usize,
}

/// Sorts by ascending position; equal positions keep miner registration order.
pub(crate) fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by_key(|c| (c.occurrence.position, c.miner_index));
}

/// Drops candidates lying inside a strictly larger span.
///
/// `horizon` is the furthest end offset seen before this group of
/// candidates; every earlier candidate started before all of these. It is
/// updated in place so enclosure carries across slices and calls.
pub(crate) fn drop_enclosed(candidates: Vec<Candidate>, horizon: &mut u64) -> Vec<Candidate> {
    let mut ordered = candidates;
    ordered.sort_by(|a, b| {
        a.occurrence
            .position
            .cmp(&b.occurrence.position)
            .then(b.occurrence.length.cmp(&a.occurrence.length))
            .then(a.miner_index.cmp(&b.miner_index))
    });

    let mut kept = Vec::with_capacity(ordered.len());
    let mut group_span: Option<(u64, usize)> = None;
    let mut before_group = *horizon;
    for candidate in ordered {
        let span = (candidate.occurrence.position, candidate.occurrence.length);
        if group_span != Some(span) {
            before_group = *horizon;
            group_span = Some(span);
        }
        let end = candidate.occurrence.end();
        if before_group < end {
            kept.push(candidate);
        }
        *horizon = (*horizon).max(end);
    }

    sort_candidates(&mut kept);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(position: u64, length: usize, miner_index: usize) -> Candidate {
        Candidate {
            occurrence: Occurrence {
                position,
                length,
                label: format!("M{miner_index}"),
                value: vec![b'x'; length],
                confidence: 1.0,
            },
            miner_index,
        }
    }

    #[test]
    fn test_sort_ties_by_registration() {
        let mut c = vec![candidate(5, 1, 2), candidate(5, 3, 0), candidate(1, 1, 1)];
        sort_candidates(&mut c);
        let order: Vec<_> = c.iter().map(|c| (c.occurrence.position, c.miner_index)).collect();
        assert_eq!(order, vec![(1, 1), (5, 0), (5, 2)]);
    }

    #[test]
    fn test_drop_enclosed() {
        // "123 456" with globs for "123", "456" and "123 456"
        let c = vec![candidate(0, 3, 0), candidate(4, 3, 1), candidate(0, 7, 2)];
        let mut horizon = 0;
        let kept = drop_enclosed(c, &mut horizon);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].occurrence.length, 7);
        assert_eq!(horizon, 7);
    }

    #[test]
    fn test_identical_spans_survive() {
        let c = vec![candidate(2, 3, 1), candidate(2, 3, 0)];
        let mut horizon = 0;
        let kept = drop_enclosed(c, &mut horizon);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].miner_index, 0);
    }

    #[test]
    fn test_horizon_carries_over() {
        let mut horizon = 10;
        let kept = drop_enclosed(vec![candidate(4, 2, 0), candidate(8, 5, 0)], &mut horizon);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].occurrence.position, 8);
        assert_eq!(horizon, 13);
    }

    #[test]
    fn test_serialize_value_as_text() {
        let occ = candidate(0, 3, 0).occurrence;
        let json = serde_json::to_value(&occ).unwrap();
        assert_eq!(json["value"], "xxx");
        assert_eq!(json["position"], 0);
    }
}
