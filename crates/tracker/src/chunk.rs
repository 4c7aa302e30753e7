//! Time range chunking
//!
//! The upstream API refuses position queries spanning more than 24 hours,
//! so every range is walked in bounded, contiguous pieces.

use chrono::{DateTime, TimeDelta, Utc};

/// Longest range a single upstream position request may cover
///
/// Must never exceed the provider's enforced maximum.
pub const MAX_CHUNK_SPAN: TimeDelta = TimeDelta::hours(24);

/// A half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeChunk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeChunk {
    pub fn span(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Split `[start, end)` into contiguous chunks no longer than `max_span`
///
/// Each chunk starts where the previous one ended. Returns no chunks when
/// `start >= end` or when `max_span` is not positive.
pub fn chunk_range(start: DateTime<Utc>, end: DateTime<Utc>, max_span: TimeDelta) -> Vec<TimeChunk> {
    debug_assert!(max_span > TimeDelta::zero(), "max_span must be positive");
    if max_span <= TimeDelta::zero() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = start;

    while current < end {
        let chunk_end = (current + max_span).min(end);
        chunks.push(TimeChunk {
            start: current,
            end: chunk_end,
        });
        current = chunk_end;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_three_chunks_with_partial_tail() {
        let chunks = chunk_range(at(10, 0), at(12, 6), MAX_CHUNK_SPAN);

        assert_eq!(
            chunks,
            vec![
                TimeChunk { start: at(10, 0), end: at(11, 0) },
                TimeChunk { start: at(11, 0), end: at(12, 0) },
                TimeChunk { start: at(12, 0), end: at(12, 6) },
            ]
        );
    }

    #[test]
    fn test_range_shorter_than_span() {
        let chunks = chunk_range(at(10, 3), at(10, 9), MAX_CHUNK_SPAN);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, at(10, 3));
        assert_eq!(chunks[0].end, at(10, 9));
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let chunks = chunk_range(at(1, 0), at(4, 0), MAX_CHUNK_SPAN);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.last().unwrap().end, at(4, 0));
    }

    #[test]
    fn test_degenerate_ranges_produce_nothing() {
        assert!(chunk_range(at(10, 0), at(10, 0), MAX_CHUNK_SPAN).is_empty());
        assert!(chunk_range(at(12, 0), at(10, 0), MAX_CHUNK_SPAN).is_empty());
    }

    #[test]
    fn test_chunks_are_contiguous_and_bounded() {
        let start = Utc.with_ymd_and_hms(2022, 3, 1, 7, 13, 5).unwrap();
        let spans = [
            TimeDelta::minutes(1),
            TimeDelta::minutes(90),
            TimeDelta::hours(24),
            TimeDelta::days(3),
        ];
        let lengths = [
            TimeDelta::seconds(1),
            TimeDelta::minutes(59),
            TimeDelta::hours(24),
            TimeDelta::hours(25),
            TimeDelta::days(400),
        ];

        for max_span in spans {
            for length in lengths {
                let end = start + length;
                let chunks = chunk_range(start, end, max_span);

                assert_eq!(chunks.first().unwrap().start, start);
                assert_eq!(chunks.last().unwrap().end, end);
                for pair in chunks.windows(2) {
                    assert_eq!(pair[0].end, pair[1].start);
                }
                for chunk in &chunks {
                    assert!(chunk.span() > TimeDelta::zero());
                    assert!(chunk.span() <= max_span);
                }

                let total = length.num_milliseconds();
                let step = max_span.num_milliseconds();
                let expected = (total + step - 1) / step;
                assert_eq!(chunks.len() as i64, expected, "span {max_span}, length {length}");
            }
        }
    }
}
