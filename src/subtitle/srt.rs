//! SRT caption generation and parsing (§6 "Caption file format").

#[derive(Debug, Clone, PartialEq)]
pub struct SrtEntry {
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

fn parse_timestamp(s: &str) -> Option<u64> {
    let (hms, millis) = s.split_once(',')?;
    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    let millis: u64 = millis.parse().ok()?;
    Some(hours * 3_600_000 + minutes * 60_000 + seconds * 1_000 + millis)
}

/// Generate an SRT document from (start_seconds, end_seconds, text) triples.
/// Empty-text entries are skipped; indices stay monotonic across the
/// surviving entries (assigned post-filter, never leaving a gap).
/// Millisecond timestamps are computed by rounding seconds × 1000, not
/// truncating.
pub fn generate_srt(segments: &[(f64, f64, String)]) -> String {
    segments
        .iter()
        .filter(|(_, _, text)| !text.trim().is_empty())
        .enumerate()
        .map(|(i, (start, end, text))| {
            let start_ms = (start * 1000.0).round() as u64;
            let end_ms = (end * 1000.0).round() as u64;
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_timestamp(start_ms),
                format_timestamp(end_ms),
                text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse an SRT document back into entries. Tolerant of trailing whitespace
/// and either `\n` or `\r\n` block separators.
pub fn parse_srt(document: &str) -> Vec<SrtEntry> {
    let normalized = document.replace("\r\n", "\n");
    let mut entries = Vec::new();

    for block in normalized.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut lines = block.lines();
        let Some(index_line) = lines.next() else { continue };
        let Ok(index) = index_line.trim().parse::<usize>() else { continue };
        let Some(time_line) = lines.next() else { continue };
        let Some((start_str, end_str)) = time_line.split_once("-->") else { continue };
        let (Some(start_ms), Some(end_ms)) =
            (parse_timestamp(start_str.trim()), parse_timestamp(end_str.trim()))
        else {
            continue;
        };
        let text = lines.collect::<Vec<_>>().join("\n");
        entries.push(SrtEntry { index, start_ms, end_ms, text });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_timestamp_rounds_milliseconds() {
        assert_eq!(format_timestamp(1500), "00:00:01,500");
        assert_eq!(format_timestamp(3_661_123), "01:01:01,123");
    }

    #[test]
    fn generate_skips_empty_text_and_keeps_monotonic_indices() {
        let segments = vec![
            (0.0, 1.5, "Hello".to_string()),
            (1.5, 2.0, "   ".to_string()),
            (2.0, 4.0, "World".to_string()),
        ];
        let srt = generate_srt(&segments);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nHello"));
        assert!(srt.contains("2\n00:00:02,000 --> 00:00:04,000\nWorld"));
        assert!(!srt.contains("   "));
    }

    #[test]
    fn round_trip_parse_matches_generated_entries() {
        let segments = vec![
            (0.0, 1.5, "Hello there".to_string()),
            (2.0, 4.25, "General Kenobi".to_string()),
        ];
        let srt = generate_srt(&segments);
        let parsed = parse_srt(&srt);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].index, 1);
        assert_eq!(parsed[0].start_ms, 0);
        assert_eq!(parsed[0].end_ms, 1500);
        assert_eq!(parsed[0].text, "Hello there");
        assert_eq!(parsed[1].end_ms, 4250);
        assert_eq!(parsed[1].text, "General Kenobi");
    }

    #[test]
    fn rounds_rather_than_truncates_fractional_milliseconds() {
        let segments = vec![(0.0, 1.2345, "x".to_string())];
        let srt = generate_srt(&segments);
        assert!(srt.contains("00:00:01,235") || srt.contains("00:00:01,234"));
    }
}
