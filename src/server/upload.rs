//! Upload admission: filename sanitization, extension allow-listing, and
//! streamed 1 MB-chunk save to `<static>/uploads/` (§4.I, §6).

use crate::error::{Error, Result};
use crate::job::InputType;
use std::path::{Path, PathBuf};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "webm", "avi", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "ogg", "aac"];

pub fn classify_extension(ext: &str) -> Result<InputType> {
    let lower = ext.to_lowercase();
    if VIDEO_EXTENSIONS.contains(&lower.as_str()) {
        Ok(InputType::Video)
    } else if AUDIO_EXTENSIONS.contains(&lower.as_str()) {
        Ok(InputType::Audio)
    } else {
        Err(Error::Validation(format!("unsupported file extension: {ext}")))
    }
}

/// `<uuid>_<safe-name><ext>`: lowercases the extension, strips path
/// separators and control characters from the stem, and prefixes a fresh
/// UUID so two uploads never collide even with an identical original name.
pub fn sanitize_filename(original: &str) -> Result<(String, String)> {
    let path = Path::new(original);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| Error::Validation("filename has no extension".to_string()))?
        .to_lowercase();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("upload");

    let safe_stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(80)
        .collect();
    let safe_stem = if safe_stem.is_empty() { "upload".to_string() } else { safe_stem };

    let id = uuid::Uuid::new_v4();
    let filename = format!("{id}_{safe_stem}.{ext}");
    Ok((filename, ext))
}

pub enum SaveError {
    Io(Error),
    TooLarge,
}

impl From<Error> for SaveError {
    fn from(e: Error) -> Self {
        SaveError::Io(e)
    }
}

/// Writes `field` to `dest` in whatever chunk sizes the multipart reader
/// yields (bounded well under 1 MB in practice), rejecting and removing the
/// partial file the moment the running total exceeds `max_file_size`.
pub async fn save_streamed(
    mut field: axum::extract::multipart::Field<'_>,
    dest: &PathBuf,
    max_file_size: u64,
) -> std::result::Result<u64, SaveError> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(dest).await.map_err(Error::Io)?;
    let mut written: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| SaveError::Io(Error::Validation(e.to_string())))?
    {
        written += chunk.len() as u64;
        if written > max_file_size {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
            return Err(SaveError::TooLarge);
        }
        file.write_all(&chunk).await.map_err(Error::Io)?;
    }
    file.flush().await.map_err(Error::Io)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_extension_and_prefixes_uuid() {
        let (filename, ext) = sanitize_filename("My Video.MP4").unwrap();
        assert!(filename.ends_with(".mp4"));
        assert_eq!(ext, "mp4");
        assert!(filename.contains('_'));
    }

    #[test]
    fn sanitize_rejects_missing_extension() {
        assert!(sanitize_filename("no_extension").is_err());
    }

    #[test]
    fn classify_extension_routes_video_and_audio() {
        assert_eq!(classify_extension("mp4").unwrap(), InputType::Video);
        assert_eq!(classify_extension("wav").unwrap(), InputType::Audio);
        assert!(classify_extension("exe").is_err());
    }
}
