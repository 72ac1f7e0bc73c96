//! Small helpers shared across provider adapters: quota-error sniffing and
//! accelerator-memory hygiene. Kept out of the pipeline proper — only
//! provider adapters interpret raw HTTP/API error bodies (§9 "provider
//! interchangeability": do not leak provider-specific types into the
//! pipeline).

const QUOTA_MARKERS: &[&str] = &["429", "quota", "resource exhausted", "rate limit"];

/// True if `message` looks like a provider quota/rate-limit rejection
/// (kind 4: Provider quota).
pub fn is_quota_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_MARKERS.iter().any(|m| lower.contains(m))
}

/// Minimum free accelerator memory (GB) required to run a local model on
/// GPU before falling back to CPU.
pub const MIN_VRAM_GB: f64 = 4.0;

/// Free-VRAM threshold below which batch size is reduced even though GPU
/// execution remains viable.
pub const LOW_VRAM_GB: f64 = 8.0;

/// Placeholder accelerator query: this crate has no GPU binding, so local
/// providers always observe "no GPU" and run on CPU. Kept as a named hook
/// so a real accelerator binding can replace it without touching callers.
pub fn free_vram_gb() -> f64 {
    0.0
}

/// Explicit memory-release point between model-heavy stages (STT→TTS,
/// STT→Translate for subtitle mode). A no-op on this crate's CPU-only
/// execution path, kept as a named hook matching the source system's
/// `clear_vram` call sites.
pub fn release_accelerator_memory(_context: &str) {}

/// Strip ```json ... ``` / ``` ... ``` markdown fences from a provider
/// reply, if present.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_lang = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_lang.strip_suffix("```").unwrap_or(without_lang).trim()
}

/// Extract the first balanced `{...}` block from `text`, tolerating
/// surrounding prose and a truncated tail. Used to recover a JSON object
/// from a response that isn't valid JSON on its own (markdown wrapping,
/// leading/trailing commentary, or a cut-off body).
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        let c = b as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_balanced_object_ignoring_braces_in_strings() {
        let text = r#"here you go: {"a": "{not a brace}", "b": 1} trailing"#;
        let extracted = extract_first_json_object(text).unwrap();
        assert_eq!(extracted, r#"{"a": "{not a brace}", "b": 1}"#);
    }

    #[test]
    fn strips_json_fence() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_markdown_fences(text), "{\"a\": 1}");
    }

    #[test]
    fn recognizes_quota_markers() {
        assert!(is_quota_error("429 Too Many Requests"));
        assert!(is_quota_error("Quota exceeded for this project"));
        assert!(is_quota_error("RESOURCE_EXHAUSTED: limit reached"));
        assert!(is_quota_error("Rate limit hit, try later"));
        assert!(!is_quota_error("invalid api key"));
    }
}
