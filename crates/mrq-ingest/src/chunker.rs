use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// One independent, retry-safe `[start, end)` slice of a larger download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateChunk {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Splits `[start, end)` into fixed-size date chunks of `chunk_days` each
/// so each chunk is independent and retry-safe. The final chunk is shortened to fit within `end`.
pub fn split_into_chunks(start: DateTime<Utc>, end: DateTime<Utc>, chunk_days: i64) -> Vec<DateChunk> {
    if start >= end || chunk_days <= 0 {
        return Vec::new();
    }

    let span = ChronoDuration::days(chunk_days);
    let mut chunks = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let chunk_end = (cursor + span).min(end);
        chunks.push(DateChunk { start: cursor, end: chunk_end });
        cursor = chunk_end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_evenly_and_caps_at_end() {
        let start = DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let end = DateTime::parse_from_rfc3339("2023-03-15T00:00:00Z").unwrap().with_timezone(&Utc);
        let chunks = split_into_chunks(start, end, 30);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start, start);
        assert_eq!(chunks.last().unwrap().end, end);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn empty_range_yields_no_chunks() {
        let t = Utc::now();
        assert!(split_into_chunks(t, t, 30).is_empty());
        assert!(split_into_chunks(t, t - ChronoDuration::days(1), 30).is_empty());
    }
}
