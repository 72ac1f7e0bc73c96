//! QualityEvaluator (component E): scores a translation on four weighted
//! axes via an LLM, dual-sampled and averaged, with one fallback call on
//! primary-provider quota exhaustion.

use crate::error::{Error, Result};
use crate::job::{QualityBreakdown, QualityResult, Recommendation};
use crate::translate::create_provider;
use regex::Regex;
use std::sync::OnceLock;

const MAX_SAMPLE_CHARS: usize = 10_000;
const MAX_ISSUES: usize = 5;
const TRUNCATION_MARKER: &str = "[…중략…]";

/// Front/middle/end thirds of a 10,000-char budget, joined with an ellipsis
/// marker, so long inputs are sampled rather than truncated.
fn sample_long_text(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= MAX_SAMPLE_CHARS {
        return text.to_string();
    }
    let third = MAX_SAMPLE_CHARS / 3;
    let front: String = chars[..third].iter().collect();
    let mid_start = chars.len() / 2 - third / 2;
    let middle: String = chars[mid_start..mid_start + third].iter().collect();
    let end: String = chars[chars.len() - third..].iter().collect();
    format!("{front} {TRUNCATION_MARKER} {middle} {TRUNCATION_MARKER} {end}")
}

fn language_note(lang: &str) -> Option<&'static str> {
    match lang {
        "ko" => Some("Evaluate honorific/politeness register (존댓말/반말) consistency as part of naturalness."),
        "ru" => Some("Evaluate grammatical case, gender, and number agreement as part of accuracy."),
        "ja" => Some("Evaluate register consistency (敬語/丁寧語/タメ口) as part of naturalness."),
        _ => None,
    }
}

fn rubric_prompt(src: &str, tgt: &str) -> String {
    let mut prompt = format!(
        "You are a dubbing translation quality evaluator. Compare the original ({src}) \
         text against its translation ({tgt}). Score four axes on a 0-100 scale:\n\
         - accuracy (weight 0.4): faithfulness to meaning; any sentence that appears cut off \
           caps accuracy at 70.\n\
         - naturalness (weight 0.3): fluency and idiomatic phrasing for spoken dialogue.\n\
         - dubbing_fit (weight 0.2): suitability of length/pacing for lip-sync dubbing.\n\
         - consistency (weight 0.1): terminology and tone consistency.\n\
         Respond with JSON only: {{\"accuracy\": N, \"naturalness\": N, \"dubbing_fit\": N, \
         \"consistency\": N, \"issues\": [\"...\"]}}. List at most 5 concrete issues."
    );
    if let Some(note) = language_note(tgt) {
        prompt.push(' ');
        prompt.push_str(note);
    }
    prompt
}

#[derive(Debug, Clone)]
struct RawScore {
    accuracy: f64,
    naturalness: f64,
    dubbing_fit: f64,
    consistency: f64,
    issues: Vec<String>,
}

fn issue_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""([^"\\]{1,200})""#).unwrap())
}

fn field_pattern(name: &str) -> Regex {
    Regex::new(&format!(r#""{name}"\s*:\s*([0-9]+(?:\.[0-9]+)?)"#)).unwrap()
}

/// Regex-based recovery for a response body cut off mid-JSON: extracts each
/// numeric axis and any complete quoted issue strings independently.
fn recover_truncated_json(body: &str) -> Option<RawScore> {
    let accuracy = field_pattern("accuracy").captures(body)?.get(1)?.as_str().parse().ok()?;
    let naturalness = field_pattern("naturalness").captures(body)?.get(1)?.as_str().parse().ok()?;
    let dubbing_fit = field_pattern("dubbing_fit").captures(body)?.get(1)?.as_str().parse().ok()?;
    let consistency = field_pattern("consistency")
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(accuracy);

    let issues_section = body.split("\"issues\"").nth(1).unwrap_or("");
    let issues = issue_pattern()
        .captures_iter(issues_section)
        .map(|c| c[1].to_string())
        .take(MAX_ISSUES)
        .collect();

    Some(RawScore {
        accuracy,
        naturalness,
        dubbing_fit,
        consistency,
        issues,
    })
}

#[derive(serde::Deserialize)]
struct ScoreReply {
    accuracy: f64,
    naturalness: f64,
    dubbing_fit: f64,
    #[serde(default)]
    consistency: f64,
    #[serde(default)]
    issues: Vec<String>,
}

fn parse_score(reply: &str) -> Result<RawScore> {
    let cleaned = crate::translate::strip_think_tags(reply);
    let fenced = crate::util::strip_markdown_fences(&cleaned);

    if let Ok(parsed) = serde_json::from_str::<ScoreReply>(fenced) {
        return Ok(RawScore {
            accuracy: parsed.accuracy,
            naturalness: parsed.naturalness,
            dubbing_fit: parsed.dubbing_fit,
            consistency: parsed.consistency,
            issues: parsed.issues,
        });
    }
    if let Some(object) = crate::util::extract_first_json_object(fenced) {
        if let Ok(parsed) = serde_json::from_str::<ScoreReply>(object) {
            return Ok(RawScore {
                accuracy: parsed.accuracy,
                naturalness: parsed.naturalness,
                dubbing_fit: parsed.dubbing_fit,
                consistency: parsed.consistency,
                issues: parsed.issues,
            });
        }
    }
    recover_truncated_json(fenced)
        .ok_or_else(|| Error::DataContract("quality evaluator reply was not parseable JSON".to_string()))
}

/// Single call against the primary provider, falling back once to
/// `fallback_engine` only when the primary reports quota exhaustion.
async fn evaluate_once(
    config: &crate::config::Config,
    prompt: &str,
    user_text: &str,
    engine: &str,
    fallback_engine: &str,
) -> Result<RawScore> {
    let primary = create_provider(engine, config)?;
    let reply = match primary.chat(Some(prompt), user_text).await {
        Ok(reply) => reply,
        Err(Error::ProviderQuota(_)) => {
            let fallback = create_provider(fallback_engine, config)?;
            fallback.chat(Some(prompt), user_text).await?
        }
        Err(e) => return Err(e),
    };
    parse_score(&reply)
}

fn normalize_issue_key(issue: &str) -> String {
    issue.trim().to_lowercase().chars().take(80).collect()
}

fn dedup_issues(a: Vec<String>, b: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for issue in a.into_iter().chain(b.into_iter()) {
        let key = normalize_issue_key(&issue);
        if seen.insert(key) {
            merged.push(issue);
        }
    }
    merged.truncate(MAX_ISSUES);
    merged
}

fn overall_score(accuracy: f64, naturalness: f64, dubbing_fit: f64, consistency: f64) -> f64 {
    0.4 * accuracy + 0.3 * naturalness + 0.2 * dubbing_fit + 0.1 * consistency
}

/// `evaluate(original, translated, src, tgt) → QualityResult`. Runs the
/// rubric prompt twice against the primary provider and averages.
pub async fn evaluate(
    config: &crate::config::Config,
    original: &str,
    translated: &str,
    src: &str,
    tgt: &str,
    engine: &str,
    fallback_engine: &str,
) -> Result<QualityResult> {
    let prompt = rubric_prompt(src, tgt);
    let sampled_original = sample_long_text(original);
    let sampled_translated = sample_long_text(translated);
    let user_text = format!(
        "Original:\n{sampled_original}\n\nTranslation:\n{sampled_translated}"
    );

    let first = evaluate_once(config, &prompt, &user_text, engine, fallback_engine).await?;
    let second = evaluate_once(config, &prompt, &user_text, engine, fallback_engine).await?;

    let breakdown = QualityBreakdown {
        accuracy: ((first.accuracy + second.accuracy) / 2.0).round(),
        naturalness: ((first.naturalness + second.naturalness) / 2.0).round(),
        dubbing_fit: ((first.dubbing_fit + second.dubbing_fit) / 2.0).round(),
        consistency: ((first.consistency + second.consistency) / 2.0).round(),
    };
    let overall = overall_score(
        breakdown.accuracy,
        breakdown.naturalness,
        breakdown.dubbing_fit,
        breakdown.consistency,
    )
    .round();
    let issues = dedup_issues(first.issues, second.issues);
    let recommendation = QualityResult::recommendation_for(overall);

    Ok(QualityResult {
        overall_score: overall,
        breakdown,
        issues,
        recommendation,
    })
}

/// Key-term preservation check used by the pipeline's quality loop: flags a
/// refinement that dropped more than 30% of the original's numbers and
/// capitalized terms.
pub fn key_terms_preserved(original: &str, refined: &str) -> bool {
    let terms = extract_key_terms(original);
    if terms.is_empty() {
        return true;
    }
    let missing = terms.iter().filter(|t| !refined.contains(t.as_str())).count();
    (missing as f64 / terms.len() as f64) <= 0.3
}

fn extract_key_terms(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|w| {
            w.chars().any(|c| c.is_ascii_digit())
                || w.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
        })
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_long_text_passes_through_short_input() {
        assert_eq!(sample_long_text("short"), "short");
    }

    #[test]
    fn sample_long_text_joins_thirds_with_marker() {
        let long = "a".repeat(30_000);
        let sampled = sample_long_text(&long);
        assert!(sampled.contains(TRUNCATION_MARKER));
        assert!(sampled.chars().count() < long.chars().count());
    }

    #[test]
    fn parse_score_reads_direct_json() {
        let reply = r#"{"accuracy": 90, "naturalness": 80, "dubbing_fit": 70, "consistency": 60, "issues": ["too literal"]}"#;
        let score = parse_score(reply).unwrap();
        assert_eq!(score.accuracy, 90.0);
        assert_eq!(score.issues, vec!["too literal".to_string()]);
    }

    #[test]
    fn parse_score_recovers_truncated_json() {
        let reply = r#"{"accuracy": 88, "naturalness": 75, "dubbing_fit": 65, "issues": ["missing a pronoun", "awkward phr"#;
        let score = parse_score(reply).unwrap();
        assert_eq!(score.accuracy, 88.0);
        assert_eq!(score.issues, vec!["missing a pronoun".to_string()]);
    }

    #[test]
    fn overall_score_applies_rubric_weights() {
        let score = overall_score(100.0, 100.0, 100.0, 100.0);
        assert!((score - 100.0).abs() < 1e-9);
        let score = overall_score(80.0, 0.0, 0.0, 0.0);
        assert!((score - 32.0).abs() < 1e-9);
    }

    #[test]
    fn dedup_issues_merges_on_normalized_prefix() {
        let merged = dedup_issues(
            vec!["Too Literal translation of idiom".to_string()],
            vec!["too literal translation of idiom".to_string(), "pacing too fast".to_string()],
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn key_terms_preserved_flags_heavy_loss() {
        let original = "Agent Smith took Flight 815 to Tokyo";
        let refined_ok = "Agent Smith boarded Flight 815 heading to Tokyo";
        let refined_bad = "he took a flight somewhere";
        assert!(key_terms_preserved(original, refined_ok));
        assert!(!key_terms_preserved(original, refined_bad));
    }
}
