use crate::error::{Error, Result};
use crate::media::path_safety::{escape_for_filtergraph, needs_safe_copy};
use crate::media::Container;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const STDERR_EXCERPT_LEN: usize = 500;

fn truncate_stderr(stderr: &[u8]) -> String {
    let s = String::from_utf8_lossy(stderr);
    let s = s.trim();
    if s.chars().count() > STDERR_EXCERPT_LEN {
        s.chars().take(STDERR_EXCERPT_LEN).collect()
    } else {
        s.to_string()
    }
}

async fn run(mut cmd: Command, timeout: Duration, op: &str) -> Result<()> {
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    let child = cmd.spawn().map_err(|e| Error::Media(format!("{op}: failed to spawn ffmpeg: {e}")))?;
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| Error::Timeout(timeout))?
        .map_err(|e| Error::Media(format!("{op}: {e}")))?;
    if !output.status.success() {
        return Err(Error::Media(format!(
            "{op}: ffmpeg exited with {}: {}",
            output.status,
            truncate_stderr(&output.stderr)
        )));
    }
    Ok(())
}

/// `probe_duration(path) → seconds | 0 on failure` (30 s hard cap).
pub async fn probe_duration(path: &Path) -> f64 {
    let fut = async {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse::<f64>().ok()
    };
    tokio::time::timeout(Duration::from_secs(30), fut)
        .await
        .ok()
        .flatten()
        .unwrap_or(0.0)
}

/// Concatenate `chunks` (in order) into `out` via the ffmpeg concat demuxer.
/// Used by TTSBackend to join per-chunk synthesized audio; a failure here is
/// fatal — the caller must not silently drop a chunk.
pub async fn concat_audio(chunks: &[PathBuf], out: &Path, timeout: Duration) -> Result<()> {
    if chunks.is_empty() {
        return Err(Error::DataContract("concat_audio: no chunks to join".to_string()));
    }
    if chunks.len() == 1 {
        tokio::fs::copy(&chunks[0], out).await.map_err(Error::Io)?;
        return Ok(());
    }

    let list_dir = tempfile::tempdir().map_err(Error::Io)?;
    let list_path = list_dir.path().join("concat.txt");
    let mut manifest = String::new();
    for chunk in chunks {
        manifest.push_str(&format!("file '{}'\n", chunk.display()));
    }
    tokio::fs::write(&list_path, manifest).await.map_err(Error::Io)?;

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(&list_path)
        .args(["-c", "copy"])
        .arg(out);
    run(cmd, timeout, "concat_audio").await
}

/// `extract_audio(video, out_wav)` — 16 kHz mono PCM.
pub async fn extract_audio(video: &Path, out_wav: &Path, timeout: Duration) -> Result<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(video)
        .args(["-vn", "-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le"])
        .arg(out_wav);
    run(cmd, timeout, "extract_audio").await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSyncMode {
    Optimize,
    Stretch,
    SpeedAudio,
}

impl From<crate::job::SyncMode> for MergeSyncMode {
    fn from(m: crate::job::SyncMode) -> Self {
        match m {
            crate::job::SyncMode::Optimize => MergeSyncMode::Optimize,
            crate::job::SyncMode::Stretch => MergeSyncMode::Stretch,
            crate::job::SyncMode::SpeedAudio => MergeSyncMode::SpeedAudio,
        }
    }
}

/// `merge(video, audio, out, sync_mode)` — one of three length-reconciliation
/// strategies (§4.A / §4.G merge-choice mapping).
pub async fn merge(
    video: &Path,
    audio: &Path,
    out: &Path,
    mode: MergeSyncMode,
    video_duration: f64,
    audio_duration: f64,
    timeout: Duration,
) -> Result<()> {
    match mode {
        MergeSyncMode::Optimize => merge_optimize(video, audio, out, timeout).await,
        MergeSyncMode::Stretch => {
            if audio_duration <= video_duration {
                merge_optimize(video, audio, out, timeout).await
            } else {
                merge_stretch(video, audio, out, video_duration, audio_duration, timeout).await
            }
        }
        MergeSyncMode::SpeedAudio => {
            let factor = if video_duration > 0.0 {
                audio_duration / video_duration
            } else {
                1.0
            };
            if (factor - 1.0).abs() < 0.02 {
                merge_optimize(video, audio, out, timeout).await
            } else {
                merge_speed_audio(video, audio, out, factor, timeout).await
            }
        }
    }
}

/// video stream copied; audio padded with silence if shorter, trimmed to
/// video duration. Output length = video length.
async fn merge_optimize(video: &Path, audio: &Path, out: &Path, timeout: Duration) -> Result<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args([
            "-filter_complex",
            "[1:a]apad[aud]",
            "-map",
            "0:v:0",
            "-map",
            "[aud]",
            "-c:v",
            "copy",
            "-c:a",
            "aac",
            "-shortest",
        ])
        .arg(out);
    run(cmd, timeout, "merge_optimize").await
}

/// Re-encode video with PTS scaling = audio/video; output length =
/// max(video, audio).
async fn merge_stretch(
    video: &Path,
    audio: &Path,
    out: &Path,
    video_duration: f64,
    audio_duration: f64,
    timeout: Duration,
) -> Result<()> {
    let factor = if video_duration > 0.0 {
        audio_duration / video_duration
    } else {
        1.0
    };
    let setpts = format!("setpts={factor:.6}*PTS");
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args(["-filter:v", &setpts, "-map", "0:v:0", "-map", "1:a:0"])
        .args(["-c:v", "libx264", "-c:a", "aac"])
        .arg(out);
    run(cmd, timeout, "merge_stretch").await
}

/// video copied; audio tempo-adjusted by `audio/video`, chained through the
/// atempo factoriser when the factor is outside ffmpeg's native [0.5, 100]
/// range for a single `atempo` stage.
async fn merge_speed_audio(
    video: &Path,
    audio: &Path,
    out: &Path,
    factor: f64,
    timeout: Duration,
) -> Result<()> {
    let chain = atempo_chain(factor);
    let filter = format!("[1:a]{}[aud]", chain.join(","));
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(video)
        .arg("-i")
        .arg(audio)
        .args([
            "-filter_complex",
            &filter,
            "-map",
            "0:v:0",
            "-map",
            "[aud]",
            "-c:v",
            "copy",
            "-c:a",
            "aac",
        ])
        .arg(out);
    run(cmd, timeout, "merge_speed_audio").await
}

/// Factorise `factor` into a chain of `atempo=<stage>` strings, each within
/// ffmpeg's native [0.5, 100] bound for a single stage. The product of all
/// stages equals `factor` within `1e-6`.
pub fn atempo_chain(factor: f64) -> Vec<String> {
    if !(factor > 0.0) {
        return vec!["atempo=1.0".to_string()];
    }
    let mut remaining = factor;
    let mut stages = Vec::new();
    while remaining > 100.0 {
        stages.push(100.0);
        remaining /= 100.0;
    }
    while remaining < 0.5 {
        stages.push(0.5);
        remaining /= 0.5;
    }
    stages.push(remaining);
    stages
        .into_iter()
        .map(|s| format!("atempo={s:.6}"))
        .collect()
}

/// Probe `ffmpeg -encoders` for NVENC availability. Failures are treated as
/// "no GPU encoder" rather than propagated.
async fn has_nvenc() -> bool {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await;
    match output {
        Ok(o) => String::from_utf8_lossy(&o.stdout).contains("h264_nvenc"),
        Err(_) => false,
    }
}

async fn prepare_safe_path(path: &Path) -> Result<(PathBuf, Option<tempfile::TempDir>)> {
    if !needs_safe_copy(path) {
        return Ok((path.to_path_buf(), None));
    }
    let dir = tempfile::tempdir().map_err(Error::Io)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("srt");
    let safe = dir.path().join(format!("captions.{ext}"));
    tokio::fs::copy(path, &safe).await.map_err(Error::Io)?;
    Ok((safe, Some(dir)))
}

/// `burn_subtitles(video, captions, out)` — re-encode with the captions
/// filter; prefer GPU (NVENC) encoder, fall back to CPU (libx264) on NVENC
/// failure or absence.
pub async fn burn_subtitles(video: &Path, captions: &Path, out: &Path, timeout: Duration) -> Result<()> {
    let (safe_captions, _guard) = prepare_safe_path(captions).await?;
    let filter = format!(
        "subtitles='{}'",
        escape_for_filtergraph(&safe_captions)
    );

    if has_nvenc().await {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-i"])
            .arg(video)
            .args(["-vf", &filter, "-c:v", "h264_nvenc", "-c:a", "copy"])
            .arg(out);
        if run(cmd, timeout, "burn_subtitles(nvenc)").await.is_ok() {
            return Ok(());
        }
    }

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(video)
        .args(["-vf", &filter, "-c:v", "libx264", "-c:a", "copy"])
        .arg(out);
    run(cmd, timeout, "burn_subtitles(cpu)").await
}

/// `embed_soft_subtitles(video, captions, out, language_tag)` — stream-copy
/// video/audio, add captions as a separate subtitle track. 60 s cap.
pub async fn embed_soft_subtitles(
    video: &Path,
    captions: &Path,
    out: &Path,
    language_tag: &str,
    timeout: Duration,
) -> Result<()> {
    let container = out
        .extension()
        .and_then(|e| e.to_str())
        .map(Container::from_extension)
        .unwrap_or(Container::Other);
    let codec = container.subtitle_codec();
    let metadata = format!("language={language_tag}");

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-i"])
        .arg(video)
        .arg("-i")
        .arg(captions)
        .args([
            "-map", "0:v:0", "-map", "0:a:0", "-map", "1:s:0", "-c:v", "copy", "-c:a", "copy",
            "-c:s",
        ])
        .arg(codec)
        .args(["-metadata:s:s:0", &metadata])
        .arg(out);
    run(cmd, timeout, "embed_soft_subtitles").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atempo_chain_within_bounds_and_product_matches() {
        for factor in [0.1, 0.3, 1.2, 50.0, 250.0, 10_000.0] {
            let chain = atempo_chain(factor);
            let mut product = 1.0;
            for stage in &chain {
                let value: f64 = stage.strip_prefix("atempo=").unwrap().parse().unwrap();
                assert!((0.5..=100.0).contains(&value), "stage {value} out of bounds");
                product *= value;
            }
            assert!((product - factor).abs() < 1e-6, "factor {factor} -> product {product}");
        }
    }

    #[test]
    fn truncate_stderr_caps_at_500_chars() {
        let long = vec![b'e'; 2000];
        let result = truncate_stderr(&long);
        assert!(result.chars().count() <= STDERR_EXCERPT_LEN);
    }
}
