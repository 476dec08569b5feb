//! Point-in-interval index over severity-tagged alert spans.
//!
//! Built once per phenomenon category, queried once per observation
//! row. Spans are sorted by start bound with their original input
//! positions retained, and a running maximum of end bounds prunes the
//! backwards walk, so a lookup costs O(log n) plus the overlapping
//! spans it actually inspects.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One severity-tagged time span as handed to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSpan {
    pub start_ts_ms_utc: i64,
    pub end_ts_ms_utc: i64,
    pub severity: u8,
}

/// Whether a span still covers the instant sitting exactly on its end
/// bound. Source vigilance exports treat both bounds as inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    InclusiveBoth,
    HalfOpenEnd,
}

impl Default for BoundaryPolicy {
    fn default() -> Self {
        BoundaryPolicy::InclusiveBoth
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlertIndexError {
    #[error("alert span ends before it starts: start_ts_ms_utc={start_ts_ms_utc} end_ts_ms_utc={end_ts_ms_utc}")]
    SpanEndsBeforeStart {
        start_ts_ms_utc: i64,
        end_ts_ms_utc: i64,
    },
}

#[derive(Debug, Clone)]
struct IndexedSpan {
    start_ts_ms_utc: i64,
    end_ts_ms_utc: i64,
    severity: u8,
    input_pos: usize,
}

/// Immutable lookup structure answering "which severity covers time t".
///
/// When several spans cover the same instant, the winner is the span
/// that appeared earliest in the input slice, independent of sort
/// order. Repeated lookups over the same input therefore always return
/// the same severity.
#[derive(Debug, Clone)]
pub struct AlertIndex {
    spans: Vec<IndexedSpan>,
    prefix_max_end: Vec<i64>,
    policy: BoundaryPolicy,
}

impl AlertIndex {
    /// Validates and indexes `spans`. Rejects any span whose end bound
    /// precedes its start bound; zero-length spans are legal.
    pub fn build(spans: &[AlertSpan], policy: BoundaryPolicy) -> Result<Self, AlertIndexError> {
        for span in spans {
            if span.end_ts_ms_utc < span.start_ts_ms_utc {
                return Err(AlertIndexError::SpanEndsBeforeStart {
                    start_ts_ms_utc: span.start_ts_ms_utc,
                    end_ts_ms_utc: span.end_ts_ms_utc,
                });
            }
        }

        let mut indexed: Vec<IndexedSpan> = spans
            .iter()
            .enumerate()
            .map(|(input_pos, span)| IndexedSpan {
                start_ts_ms_utc: span.start_ts_ms_utc,
                end_ts_ms_utc: span.end_ts_ms_utc,
                severity: span.severity,
                input_pos,
            })
            .collect();
        indexed.sort_by_key(|span| span.start_ts_ms_utc);

        let mut prefix_max_end = Vec::with_capacity(indexed.len());
        let mut running_max = i64::MIN;
        for span in &indexed {
            running_max = running_max.max(span.end_ts_ms_utc);
            prefix_max_end.push(running_max);
        }

        Ok(Self {
            spans: indexed,
            prefix_max_end,
            policy,
        })
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn policy(&self) -> BoundaryPolicy {
        self.policy
    }

    /// Severity active at `ts_ms_utc`, or `None` when no span covers it.
    pub fn resolve(&self, ts_ms_utc: i64) -> Option<u8> {
        let upper = self
            .spans
            .partition_point(|span| span.start_ts_ms_utc <= ts_ms_utc);

        let mut winner: Option<(usize, u8)> = None;
        for idx in (0..upper).rev() {
            // Everything at or below idx ends before ts once the prefix
            // maximum drops under it.
            if self.prefix_max_end[idx] < ts_ms_utc {
                break;
            }
            let span = &self.spans[idx];
            if !self.end_covers(span.end_ts_ms_utc, ts_ms_utc) {
                continue;
            }
            match winner {
                Some((input_pos, _)) if input_pos <= span.input_pos => {}
                _ => winner = Some((span.input_pos, span.severity)),
            }
        }
        winner.map(|(_, severity)| severity)
    }

    fn end_covers(&self, end_ts_ms_utc: i64, ts_ms_utc: i64) -> bool {
        match self.policy {
            BoundaryPolicy::InclusiveBoth => ts_ms_utc <= end_ts_ms_utc,
            BoundaryPolicy::HalfOpenEnd => ts_ms_utc < end_ts_ms_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: i64, end: i64, severity: u8) -> AlertSpan {
        AlertSpan {
            start_ts_ms_utc: start,
            end_ts_ms_utc: end,
            severity,
        }
    }

    fn build(spans: &[AlertSpan]) -> AlertIndex {
        AlertIndex::build(spans, BoundaryPolicy::InclusiveBoth).expect("valid spans expected")
    }

    #[test]
    fn empty_index_resolves_nothing() {
        let index = build(&[]);
        assert!(index.is_empty());
        assert_eq!(index.resolve(0), None);
        assert_eq!(index.resolve(i64::MAX), None);
    }

    #[test]
    fn single_span_bounds_are_inclusive() {
        let index = build(&[span(100, 200, 3)]);
        assert_eq!(index.resolve(99), None);
        assert_eq!(index.resolve(100), Some(3));
        assert_eq!(index.resolve(150), Some(3));
        assert_eq!(index.resolve(200), Some(3));
        assert_eq!(index.resolve(201), None);
    }

    #[test]
    fn zero_length_span_covers_its_single_instant() {
        let index = build(&[span(100, 100, 2)]);
        assert_eq!(index.resolve(100), Some(2));
        assert_eq!(index.resolve(99), None);
        assert_eq!(index.resolve(101), None);
    }

    #[test]
    fn half_open_end_excludes_the_end_bound() {
        let index = AlertIndex::build(&[span(100, 200, 3)], BoundaryPolicy::HalfOpenEnd)
            .expect("valid spans expected");
        assert_eq!(index.resolve(100), Some(3));
        assert_eq!(index.resolve(199), Some(3));
        assert_eq!(index.resolve(200), None);
    }

    #[test]
    fn half_open_zero_length_span_covers_nothing() {
        let index = AlertIndex::build(&[span(100, 100, 2)], BoundaryPolicy::HalfOpenEnd)
            .expect("valid spans expected");
        assert_eq!(index.resolve(100), None);
    }

    #[test]
    fn overlap_winner_is_first_in_input_order() {
        let index = build(&[span(100, 300, 2), span(50, 400, 4)]);
        // Both spans cover 150..=250; the first-listed one wins even
        // though the second starts earlier and sorts ahead of it.
        assert_eq!(index.resolve(200), Some(2));
        // Outside the first span only the second applies.
        assert_eq!(index.resolve(60), Some(4));
        assert_eq!(index.resolve(350), Some(4));
    }

    #[test]
    fn overlap_winner_flips_with_input_order() {
        let forward = build(&[span(100, 300, 2), span(100, 300, 4)]);
        let reversed = build(&[span(100, 300, 4), span(100, 300, 2)]);
        assert_eq!(forward.resolve(200), Some(2));
        assert_eq!(reversed.resolve(200), Some(4));
    }

    #[test]
    fn nested_and_chained_spans_resolve_each_region() {
        let index = build(&[
            span(0, 1000, 1),
            span(100, 200, 3),
            span(200, 300, 4),
            span(500, 500, 2),
        ]);
        assert_eq!(index.resolve(50), Some(1));
        assert_eq!(index.resolve(150), Some(1)); // outermost listed first
        assert_eq!(index.resolve(1000), Some(1));
        assert_eq!(index.resolve(1001), None);

        let inner_first = build(&[
            span(100, 200, 3),
            span(200, 300, 4),
            span(0, 1000, 1),
            span(500, 500, 2),
        ]);
        assert_eq!(inner_first.resolve(150), Some(3));
        assert_eq!(inner_first.resolve(200), Some(3)); // both touch 200, first wins
        assert_eq!(inner_first.resolve(250), Some(4));
        assert_eq!(inner_first.resolve(500), Some(1));
    }

    #[test]
    fn rejects_span_ending_before_it_starts() {
        let err = AlertIndex::build(&[span(200, 100, 3)], BoundaryPolicy::InclusiveBoth)
            .expect_err("inverted span must be rejected");
        assert_eq!(
            err,
            AlertIndexError::SpanEndsBeforeStart {
                start_ts_ms_utc: 200,
                end_ts_ms_utc: 100,
            }
        );
    }

    #[test]
    fn resolve_matches_linear_scan_on_dense_overlaps() {
        // Deterministic span soup with heavy overlap, long tails, and
        // duplicates, checked against the obvious O(n) oracle.
        let mut spans = Vec::new();
        for i in 0..48_i64 {
            let start = (i * 37) % 211;
            let len = (i * 13) % 53;
            spans.push(span(start, start + len, (i % 4 + 1) as u8));
        }
        let index = build(&spans);

        for ts in -5..280_i64 {
            let oracle = spans
                .iter()
                .enumerate()
                .find(|(_, s)| s.start_ts_ms_utc <= ts && ts <= s.end_ts_ms_utc)
                .map(|(_, s)| s.severity);
            assert_eq!(index.resolve(ts), oracle, "ts={ts}");
        }
    }

    #[test]
    fn resolve_is_stable_across_rebuilds() {
        let spans = [
            span(0, 500, 2),
            span(100, 600, 3),
            span(100, 600, 4),
            span(550, 800, 1),
        ];
        let first = build(&spans);
        let second = build(&spans);
        for ts in (0..850).step_by(25) {
            assert_eq!(first.resolve(ts), second.resolve(ts), "ts={ts}");
        }
    }
}
