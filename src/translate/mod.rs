//! TranslateBackend (component C): text→text with sync-mode-aware prompts,
//! chunked translation for long inputs, and batched segment translation for
//! subtitle mode.

mod batch;
mod hosted_a;
mod hosted_b;
mod local;
mod sanitize;

pub use sanitize::{sanitize_input, split_sentences, strip_think_tags, MAX_TEXT_LENGTH};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::SyncMode;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const LONG_INPUT_THRESHOLD: usize = 8_000;
const CHUNK_MAX_LEN: usize = 6_000;
const SHORT_RESULT_RATIO: f64 = 0.4;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn chat(&self, system_prompt: Option<&str>, user_text: &str) -> Result<String>;
}

pub fn create_provider(name: &str, config: &Config) -> Result<Arc<dyn ChatProvider>> {
    match name {
        "local" => Ok(Arc::new(local::LocalChat::new(config))),
        "hosted-llm-a" => Ok(Arc::new(hosted_a::HostedChatA::new(config)?)),
        "hosted-llm-b" => Ok(Arc::new(hosted_b::HostedChatB::new(config)?)),
        other => Err(Error::Validation(format!(
            "unknown translation engine: {other}"
        ))),
    }
}

/// `hosted-llm-b` is the automatic fallback target when `hosted-llm-a`
/// reports quota exhaustion.
async fn chat_with_quota_fallback(
    config: &Config,
    engine: &str,
    system_prompt: Option<&str>,
    user_text: &str,
) -> Result<String> {
    let provider = create_provider(engine, config)?;
    match provider.chat(system_prompt, user_text).await {
        Err(Error::ProviderQuota(_)) if engine == "hosted-llm-a" => {
            let fallback = create_provider("hosted-llm-b", config)?;
            fallback.chat(system_prompt, user_text).await
        }
        other => other,
    }
}

/// Retry transient provider errors with exponential backoff (2^n seconds),
/// up to `max_attempts`.
async fn chat_with_retry(
    config: &Config,
    engine: &str,
    system_prompt: Option<&str>,
    user_text: &str,
    max_attempts: u32,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        match chat_with_quota_fallback(config, engine, system_prompt, user_text).await {
            Ok(reply) => return Ok(reply),
            Err(Error::TransientProvider(msg)) if attempt + 1 < max_attempts => {
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                tracing::warn!("translate retry {attempt}/{max_attempts}: {msg}");
            }
            Err(e) => return Err(e),
        }
    }
}

fn sync_mode_prompt(mode: SyncMode) -> &'static str {
    match mode {
        SyncMode::Optimize => {
            "Translate concisely, preserving meaning. Slight compression is allowed to match spoken duration, but do not omit content."
        }
        SyncMode::SpeedAudio | SyncMode::Stretch => {
            "Translate completely. Do not omit or summarize any content."
        }
    }
}

fn language_guidance(target: &str) -> Option<&'static str> {
    match target {
        "ko" => Some("Use natural, contextually appropriate honorific/politeness levels (존댓말/반말) for the scene."),
        "ru" => Some("Apply correct grammatical case, gender, and number agreement throughout."),
        "ja" => Some("Select an appropriate register (敬語/丁寧語/タメ口) consistent with the speakers' relationship."),
        _ => None,
    }
}

fn translate_system_prompt(src: &str, tgt: &str, mode: SyncMode) -> String {
    let mut prompt = format!(
        "You are a professional dubbing translator. Translate from {src} to {tgt}. {}",
        sync_mode_prompt(mode)
    );
    if let Some(guidance) = language_guidance(tgt) {
        prompt.push(' ');
        prompt.push_str(guidance);
    }
    prompt
}

fn translate_segments_system_prompt(src: &str, tgt: &str) -> String {
    format!(
        "Translate each numbered segment from {src} to {tgt}. Preserve the exact tag wrapper \
         `<sN>...</sN>` for every segment in your reply, translating only the text between the \
         tags. Keep translations concise and natural for spoken dialogue."
    )
}

/// `translate_raw(user_text, system_prompt, engine)` — no prompt wrapping,
/// used by segment-batch translation.
pub async fn translate_raw(
    config: &Config,
    user_text: &str,
    system_prompt: &str,
    engine: &str,
) -> Result<String> {
    let reply = chat_with_retry(config, engine, Some(system_prompt), user_text, 3).await?;
    Ok(strip_think_tags(&reply))
}

/// `translate(text, src, tgt, sync_mode, engine) → str`.
pub async fn translate(
    config: &Config,
    text: &str,
    src: &str,
    tgt: &str,
    sync_mode: SyncMode,
    engine: &str,
) -> Result<String> {
    let sanitized = sanitize_input(text);
    let system = translate_system_prompt(src, tgt, sync_mode);

    if sanitized.chars().count() <= LONG_INPUT_THRESHOLD {
        return translate_one_chunk(config, &sanitized, &system, engine).await;
    }

    let chunks = split_sentences(&sanitized, CHUNK_MAX_LEN);
    let mut translated_chunks = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        translated_chunks.push(translate_one_chunk(config, &chunk, &system, engine).await?);
    }
    Ok(translated_chunks.join("\n"))
}

async fn translate_one_chunk(
    config: &Config,
    chunk: &str,
    system: &str,
    engine: &str,
) -> Result<String> {
    let first = chat_with_retry(config, engine, Some(system), chunk, 3).await?;
    let first = strip_think_tags(&first);

    // A chunk translation whose length is <40% of source length is retried
    // once; the longer result is kept.
    if is_suspiciously_short(chunk, &first) {
        if let Ok(retry) = chat_with_retry(config, engine, Some(system), chunk, 3).await {
            let retry = strip_think_tags(&retry);
            if retry.chars().count() > first.chars().count() {
                return Ok(retry);
            }
        }
    }
    Ok(first)
}

fn is_suspiciously_short(source: &str, translated: &str) -> bool {
    let source_len = source.chars().count().max(1);
    (translated.chars().count() as f64 / source_len as f64) < SHORT_RESULT_RATIO
}

/// `refine(original, translated, src, tgt, issues, sync_mode, engine) → str`
/// — never raises; falls back to the previous translation on failure
/// (refinement is best-effort, the quality loop tolerates a no-op round).
pub async fn refine(
    config: &Config,
    original: &str,
    translated: &str,
    src: &str,
    tgt: &str,
    issues: &[String],
    sync_mode: SyncMode,
    engine: &str,
) -> String {
    let issues_text = if issues.is_empty() {
        "general fluency and accuracy".to_string()
    } else {
        issues.join("; ")
    };
    let system = format!(
        "{} Improve the following translation, specifically addressing these issues: {issues_text}. \
         Preserve all numbers and proper nouns from the original.",
        translate_system_prompt(src, tgt, sync_mode)
    );
    let user = format!("Original ({src}):\n{original}\n\nCurrent translation ({tgt}):\n{translated}");

    match chat_with_retry(config, engine, Some(&system), &user, 2).await {
        Ok(reply) => strip_think_tags(&reply),
        Err(_) => translated.to_string(),
    }
}

/// `translate_segments(segments, src, tgt, engine, progress_cb?) →
/// (translated_segments, success_rate_pct)`.
pub async fn translate_segments(
    config: &Config,
    segments: &[String],
    src: &str,
    tgt: &str,
    engine: &str,
    mut progress_cb: Option<&mut (dyn FnMut(usize, usize) + Send)>,
) -> Result<(Vec<String>, f64)> {
    let mut results = vec![String::new(); segments.len()];
    let mut total_non_empty = 0usize;
    let mut total_parsed = 0usize;
    let system = translate_segments_system_prompt(src, tgt);

    for chunk in batch::chunk_indices(segments.len()) {
        let chunk_segments: Vec<String> = chunk.iter().map(|&i| segments[i].clone()).collect();
        let non_empty_count = chunk_segments.iter().filter(|s| !s.trim().is_empty()).count();
        total_non_empty += non_empty_count;

        if non_empty_count == 0 {
            for &global_i in &chunk {
                results[global_i] = String::new();
            }
            continue;
        }

        let prompt = batch::build_tagged_prompt(&chunk_segments);
        let reply = chat_with_retry(config, engine, Some(&system), &prompt, 3).await?;
        let reply = strip_think_tags(&reply);
        let mut slots = batch::parse_tagged_reply(&reply, chunk_segments.len());

        let parsed_count = slots.iter().filter(|s| s.is_some()).count();
        total_parsed += parsed_count;
        let chunk_rate = batch::success_rate_pct(&slots, non_empty_count);

        if chunk_rate < batch::SUCCESS_THRESHOLD_PCT {
            // Whole chunk falls back to per-segment translation.
            for (local_i, text) in chunk_segments.iter().enumerate() {
                if text.trim().is_empty() {
                    slots[local_i] = Some(String::new());
                    continue;
                }
                slots[local_i] =
                    Some(translate(config, text, src, tgt, SyncMode::Optimize, engine).await?);
            }
        } else {
            // ≥70%: retranslate only the missing items one-by-one.
            for (local_i, slot) in slots.iter_mut().enumerate() {
                if slot.is_none() {
                    let text = &chunk_segments[local_i];
                    if text.trim().is_empty() {
                        *slot = Some(String::new());
                        continue;
                    }
                    *slot =
                        Some(translate(config, text, src, tgt, SyncMode::Optimize, engine).await?);
                }
            }
        }

        for (local_i, global_i) in chunk.iter().enumerate() {
            results[*global_i] = slots[local_i].clone().unwrap_or_default();
        }

        if let Some(cb) = progress_cb.as_deref_mut() {
            let done = chunk.last().map(|&i| i + 1).unwrap_or(0);
            cb(done, segments.len());
        }
    }

    let success_rate = if total_non_empty == 0 {
        100.0
    } else {
        (total_parsed as f64 / total_non_empty as f64) * 100.0
    };
    Ok((results, success_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_mode_prompts_match_spec_wording() {
        assert!(sync_mode_prompt(SyncMode::Optimize).contains("Slight compression"));
        assert!(sync_mode_prompt(SyncMode::SpeedAudio).contains("Do not omit"));
        assert!(sync_mode_prompt(SyncMode::Stretch).contains("Do not omit"));
    }

    #[test]
    fn language_guidance_covers_ko_ru_ja_only() {
        assert!(language_guidance("ko").is_some());
        assert!(language_guidance("ru").is_some());
        assert!(language_guidance("ja").is_some());
        assert!(language_guidance("en").is_none());
    }

    #[test]
    fn is_suspiciously_short_flags_under_40_percent() {
        assert!(is_suspiciously_short("a source text of some length here", "x"));
        assert!(!is_suspiciously_short("short", "a reasonably sized translation"));
    }
}
