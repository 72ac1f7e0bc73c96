//! Path validation shared by upload handling, MediaOps filter arguments, and
//! JobManager's orphan sweeper.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Characters that are unsafe to interpolate into a shell or an ffmpeg
/// filtergraph argument.
const SHELL_METACHARACTERS: &[char] = &['|', ';', '&', '$', '`', '\n', '\r'];

pub fn validate_path_component(path: &Path) -> Result<()> {
    let s = path.to_string_lossy();
    if s.contains('\0') {
        return Err(Error::Validation("path contains a null byte".into()));
    }
    if path.components().any(|c| c == std::path::Component::ParentDir) {
        return Err(Error::Validation("path contains '..'".into()));
    }
    if s.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
        return Err(Error::Validation(
            "path contains shell metacharacters".into(),
        ));
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        if name.starts_with('-') {
            return Err(Error::Validation(
                "filename must not begin with '-'".into(),
            ));
        }
    }
    Ok(())
}

/// (I4/I5) Resolve `path` and confirm it lies strictly under `root`.
pub fn ensure_under_root(path: &Path, root: &Path) -> Result<PathBuf> {
    validate_path_component(path)?;
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let resolved = std::fs::canonicalize(&resolved).unwrap_or(resolved);
    if !resolved.starts_with(&root) {
        return Err(Error::Validation(format!(
            "path {} escapes root {}",
            resolved.display(),
            root.display()
        )));
    }
    Ok(resolved)
}

/// True if `path`'s basename would be unsafe to interpolate directly into an
/// ffmpeg `subtitles='...'` filter (non-ASCII, spaces, or libass-special
/// characters). Such paths must be copied to a sanitized temp path first.
pub fn needs_safe_copy(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    !name.is_ascii()
        || name
            .chars()
            .any(|c| matches!(c, ' ' | '(' | ')' | '[' | ']' | '{' | '}' | '\'' | '"' | '!' | '#' | '$' | '%' | '&'))
}

/// Escape a path for embedding inside an ffmpeg filtergraph's
/// `subtitles='<path>'` argument (colons and backslashes are filter
/// metacharacters for libass).
pub fn escape_for_filtergraph(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_null_byte() {
        let path = PathBuf::from("/tmp/evil\0.mp4");
        assert!(validate_path_component(&path).is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let path = PathBuf::from("../../etc/passwd");
        assert!(validate_path_component(&path).is_err());
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let path = PathBuf::from("/tmp/a;rm -rf ~.mp4");
        assert!(validate_path_component(&path).is_err());
    }

    #[test]
    fn rejects_leading_dash_basename() {
        let path = PathBuf::from("/tmp/-rf.mp4");
        assert!(validate_path_component(&path).is_err());
    }

    #[test]
    fn accepts_safe_path() {
        let path = PathBuf::from("/tmp/abc123_safe.mp4");
        assert!(validate_path_component(&path).is_ok());
    }

    #[test]
    fn detects_unsafe_basenames_for_filtergraph() {
        assert!(needs_safe_copy(Path::new("/tmp/한국어.srt")));
        assert!(needs_safe_copy(Path::new("/tmp/my captions.srt")));
        assert!(!needs_safe_copy(Path::new("/tmp/captions_abc123.srt")));
    }
}
