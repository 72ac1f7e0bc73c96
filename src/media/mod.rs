//! MediaOps (component A): probing, audio extraction, length-reconciling
//! mux, and subtitle burn-in/soft-embed. Wraps an external ffmpeg/ffprobe
//! transcoder via `tokio::process::Command`.

pub mod ffmpeg;
pub mod path_safety;

pub use ffmpeg::{
    burn_subtitles, concat_audio, embed_soft_subtitles, extract_audio, merge, probe_duration,
    MergeSyncMode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Mkv,
    Webm,
    Other,
}

impl Container {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "mp4" | "mov" | "m4v" => Container::Mp4,
            "mkv" => Container::Mkv,
            "webm" => Container::Webm,
            _ => Container::Other,
        }
    }

    /// Soft-subtitle codec selection (§6): mp4 → mov_text, mkv → srt,
    /// webm → webvtt, else → mov_text.
    pub fn subtitle_codec(self) -> &'static str {
        match self {
            Container::Mp4 => "mov_text",
            Container::Mkv => "srt",
            Container::Webm => "webvtt",
            Container::Other => "mov_text",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtitle_codec_selection() {
        assert_eq!(Container::from_extension("mp4").subtitle_codec(), "mov_text");
        assert_eq!(Container::from_extension("MKV").subtitle_codec(), "srt");
        assert_eq!(Container::from_extension("webm").subtitle_codec(), "webvtt");
        assert_eq!(Container::from_extension("avi").subtitle_codec(), "mov_text");
    }
}
