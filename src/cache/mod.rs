//! TranslationCache (component F): content-addressed on-disk store of
//! (translated_text, quality_result) keyed on (text, src, tgt, mode).

use crate::error::{Error, Result};
use crate::job::{QualityResult, SyncMode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const KEY_HEX_LEN: usize = 24;
const DEFAULT_EXPIRATION_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationCacheEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source_lang: String,
    pub target_lang: String,
    pub sync_mode: SyncMode,
    pub translated_text: String,
    pub quality_result: Option<QualityResult>,
}

pub struct TranslationCache {
    root: PathBuf,
    expiration_days: i64,
}

impl TranslationCache {
    pub fn new(static_dir: &Path) -> Self {
        Self {
            root: static_dir.join("cache").join("translations"),
            expiration_days: DEFAULT_EXPIRATION_DAYS,
        }
    }

    pub fn with_expiration_days(mut self, days: i64) -> Self {
        self.expiration_days = days;
        self
    }

    fn key(&self, text: &str, src: &str, tgt: &str, mode: SyncMode) -> String {
        let mode_tag = match mode {
            SyncMode::Optimize => "optimize",
            SyncMode::SpeedAudio => "speed_audio",
            SyncMode::Stretch => "stretch",
        };
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(b"|");
        hasher.update(src.as_bytes());
        hasher.update(b"|");
        hasher.update(tgt.as_bytes());
        hasher.update(b"|");
        hasher.update(mode_tag.as_bytes());
        let digest = hasher.finalize();
        hex::encode(digest)[..KEY_HEX_LEN].to_string()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// A hit below the admission floor is invalidated on read so a stale,
    /// low-quality translation never silently short-circuits a retry.
    pub async fn get(
        &self,
        text: &str,
        src: &str,
        tgt: &str,
        mode: SyncMode,
        quality_floor: f64,
    ) -> Option<TranslationCacheEntry> {
        let key = self.key(text, src, tgt, mode);
        let path = self.entry_path(&key);

        let raw = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return None,
        };
        let entry: TranslationCacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(_) => {
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        };

        let age = chrono::Utc::now() - entry.timestamp;
        if age.num_days() > self.expiration_days {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }

        if let Some(quality) = &entry.quality_result {
            if quality.overall_score < quality_floor {
                let _ = tokio::fs::remove_file(&path).await;
                return None;
            }
        }

        Some(entry)
    }

    /// Atomic write: serialize to a temp file in the cache root, then
    /// rename over the destination.
    pub async fn put(
        &self,
        text: &str,
        src: &str,
        tgt: &str,
        mode: SyncMode,
        translated_text: String,
        quality_result: Option<QualityResult>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(Error::Io)?;
        let key = self.key(text, src, tgt, mode);
        let path = self.entry_path(&key);
        let entry = TranslationCacheEntry {
            timestamp: chrono::Utc::now(),
            source_lang: src.to_string(),
            target_lang: tgt.to_string(),
            sync_mode: mode,
            translated_text,
            quality_result,
        };
        let body = serde_json::to_vec_pretty(&entry)?;

        let tmp_path = self.root.join(format!("{key}.json.tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp_path, &body).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(Error::Io)?;
        Ok(())
    }

    pub async fn invalidate(&self, text: &str, src: &str, tgt: &str, mode: SyncMode) {
        let key = self.key(text, src, tgt, mode);
        let _ = tokio::fs::remove_file(self.entry_path(&key)).await;
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{QualityBreakdown, Recommendation};

    fn quality(score: f64) -> QualityResult {
        QualityResult {
            overall_score: score,
            breakdown: QualityBreakdown {
                accuracy: score,
                naturalness: score,
                dubbing_fit: score,
                consistency: score,
            },
            issues: Vec::new(),
            recommendation: QualityResult::recommendation_for(score),
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips_above_floor() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(dir.path());
        cache
            .put("hello", "en", "ko", SyncMode::Optimize, "안녕".to_string(), Some(quality(90.0)))
            .await
            .unwrap();
        let hit = cache.get("hello", "en", "ko", SyncMode::Optimize, 60.0).await;
        assert_eq!(hit.unwrap().translated_text, "안녕");
    }

    #[tokio::test]
    async fn get_invalidates_entry_below_quality_floor() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(dir.path());
        cache
            .put("hello", "en", "ko", SyncMode::Optimize, "안녕".to_string(), Some(quality(40.0)))
            .await
            .unwrap();
        let hit = cache.get("hello", "en", "ko", SyncMode::Optimize, 60.0).await;
        assert!(hit.is_none());
        let path = cache.entry_path(&cache.key("hello", "en", "ko", SyncMode::Optimize));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn get_misses_on_different_key_components() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(dir.path());
        cache
            .put("hello", "en", "ko", SyncMode::Optimize, "안녕".to_string(), Some(quality(90.0)))
            .await
            .unwrap();
        assert!(cache.get("hello", "en", "ja", SyncMode::Optimize, 60.0).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_is_deleted_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(dir.path());
        tokio::fs::create_dir_all(&cache.root).await.unwrap();
        let key = cache.key("hello", "en", "ko", SyncMode::Optimize);
        tokio::fs::write(cache.entry_path(&key), b"not json").await.unwrap();
        assert!(cache.get("hello", "en", "ko", SyncMode::Optimize, 0.0).await.is_none());
        assert!(!cache.entry_path(&key).exists());
    }

    #[tokio::test]
    async fn key_is_24_hex_chars() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TranslationCache::new(dir.path());
        let key = cache.key("hello", "en", "ko", SyncMode::Optimize);
        assert_eq!(key.len(), KEY_HEX_LEN);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
