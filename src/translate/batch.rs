//! Segment-batch translation protocol: numbered-tag wrapping and parsing
//! for `translate_segments`.

use regex::Regex;
use std::sync::OnceLock;

pub const CHUNK_SIZE: usize = 10;
pub const SUCCESS_THRESHOLD_PCT: f64 = 70.0;

/// Wrap `segments` (already-translated-unit texts, 1-indexed by position)
/// into a single prompt body using `<s{i}>...</s{i}>` tags.
pub fn build_tagged_prompt(segments: &[String]) -> String {
    segments
        .iter()
        .enumerate()
        .map(|(i, text)| format!("<s{}>{}</s{}>", i + 1, text, i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<s(\d+)>(.*?)</s\1>").expect("static pattern"))
}

fn bracket_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?m)^\s*\[(\d+)\]\s*(.*)$").expect("static pattern"))
}

/// Parse a batch reply back into `expected_count` slots (1-indexed),
/// preferring `<sN>...</sN>` tags and accepting `[N] text` lines as a
/// fallback form. Unmatched slots are left as `None`.
pub fn parse_tagged_reply(reply: &str, expected_count: usize) -> Vec<Option<String>> {
    let mut slots: Vec<Option<String>> = vec![None; expected_count];

    for capture in tag_pattern().captures_iter(reply) {
        if let Ok(idx) = capture[1].parse::<usize>() {
            if idx >= 1 && idx <= expected_count {
                slots[idx - 1] = Some(capture[2].trim().to_string());
            }
        }
    }

    if slots.iter().all(Option::is_none) {
        for capture in bracket_pattern().captures_iter(reply) {
            if let Ok(idx) = capture[1].parse::<usize>() {
                if idx >= 1 && idx <= expected_count {
                    slots[idx - 1] = Some(capture[2].trim().to_string());
                }
            }
        }
    }

    slots
}

/// Success rate = parsed / non-empty, as a percentage.
pub fn success_rate_pct(slots: &[Option<String>], non_empty_count: usize) -> f64 {
    if non_empty_count == 0 {
        return 100.0;
    }
    let parsed = slots.iter().filter(|s| s.is_some()).count();
    (parsed as f64 / non_empty_count as f64) * 100.0
}

/// Split `items` into chunks of at most `CHUNK_SIZE`, preserving order and
/// original indices.
pub fn chunk_indices(len: usize) -> Vec<Vec<usize>> {
    (0..len)
        .collect::<Vec<_>>()
        .chunks(CHUNK_SIZE)
        .map(|c| c.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_tagged_segments() {
        let segments = vec!["hello".to_string(), "world".to_string()];
        let prompt = build_tagged_prompt(&segments);
        let reply = prompt.replace("hello", "안녕").replace("world", "세상");
        let parsed = parse_tagged_reply(&reply, 2);
        assert_eq!(parsed, vec![Some("안녕".to_string()), Some("세상".to_string())]);
    }

    #[test]
    fn falls_back_to_bracket_markers() {
        let reply = "[1] 안녕\n[2] 세상";
        let parsed = parse_tagged_reply(reply, 2);
        assert_eq!(parsed, vec![Some("안녕".to_string()), Some("세상".to_string())]);
    }

    #[test]
    fn leaves_missing_slots_as_none() {
        let reply = "<s1>안녕</s1>";
        let parsed = parse_tagged_reply(reply, 3);
        assert_eq!(parsed, vec![Some("안녕".to_string()), None, None]);
    }

    #[test]
    fn success_rate_counts_parsed_over_non_empty() {
        let slots = vec![Some("a".to_string()), None, Some("b".to_string())];
        assert_eq!(success_rate_pct(&slots, 3), 200.0 / 3.0);
    }

    #[test]
    fn chunk_indices_respects_size_ten() {
        let chunks = chunk_indices(25);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }
}
