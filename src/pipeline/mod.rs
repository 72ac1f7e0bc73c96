//! Pipeline (component G): the state machine that chains MediaOps,
//! STTBackend, TranslateBackend, QualityEvaluator, TTSBackend and
//! TranslationCache into the dubbing and subtitle execution graphs.

use crate::cache::TranslationCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::job::{InputType, Job, JobMode, JobStatus, QualityResult, StepState, SyncMode};
use crate::manager::JobManager;
use crate::{media, quality, stt, subtitle, translate, tts};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Best-effort quality evaluator providers: mirrors TranslateBackend's own
/// quota-fallback pair (hosted-llm-a primary, hosted-llm-b fallback).
const QUALITY_ENGINE: &str = "hosted-llm-a";
const QUALITY_FALLBACK_ENGINE: &str = "hosted-llm-b";
const MAX_QUALITY_ITERATIONS: usize = 3;
const QUALITY_EARLY_STOP: f64 = 85.0;
const TRUNCATION_GUARD_RATIO: f64 = 0.5;
const SUBTITLE_RETRY_THRESHOLD_PCT: f64 = 70.0;

async fn check_cancelled(manager: &JobManager, job_id: &str) -> Result<()> {
    if manager.is_cancelled(job_id).await {
        return Err(Error::Cancelled);
    }
    Ok(())
}

async fn with_timeout<T>(duration: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(duration)),
    }
}

/// Entry point: run a job to completion (or failure/cancellation),
/// recording every stage transition on the shared `JobManager`. Spawned as
/// its own long-lived task per accepted job by the control plane.
pub async fn run_job(manager: Arc<JobManager>, config: Arc<Config>, cache: Arc<TranslationCache>, job_id: String) {
    let _ = manager.update_status(&job_id, JobStatus::Processing).await;

    let Some(job) = manager.get(&job_id).await else {
        tracing::error!("pipeline started for unknown job {job_id}");
        return;
    };

    let result = match job.settings.mode {
        JobMode::Dubbing => run_dubbing(&manager, &config, &cache, &job_id, &job).await,
        JobMode::Subtitle => run_subtitle(&manager, &config, &cache, &job_id, &job).await,
    };

    match result {
        Ok(()) => {
            let _ = manager.update_progress(&job_id, 100).await;
            let _ = manager.update_status(&job_id, JobStatus::Completed).await;
        }
        Err(Error::Cancelled) => {
            let _ = manager.append_log(&job_id, "pipeline stopped: cancelled by user").await;
        }
        Err(e) => {
            let message = e.user_message();
            let _ = manager.append_log(&job_id, format!("pipeline failed: {message}")).await;
            let _ = manager.set_error(&job_id, message).await;
            let _ = manager.update_status(&job_id, JobStatus::Failed).await;
        }
    }
}

async fn fail_step(manager: &JobManager, job_id: &str, step: &str, err: Error) -> Error {
    if !err.is_cancelled() {
        let _ = manager.update_step(job_id, step, StepState::Failed).await;
    }
    err
}

/// Extract (video only) → transcribe → translate → quality loop (optional)
/// → TTS → merge (video) / direct output (audio).
async fn run_dubbing(
    manager: &JobManager,
    config: &Config,
    cache: &TranslationCache,
    job_id: &str,
    job: &Job,
) -> Result<()> {
    let scratch = tempfile::tempdir().map_err(Error::Io)?;
    let settings = &job.settings;
    let src = settings.source_lang.as_str();
    let tgt = settings.target_lang.as_str();

    check_cancelled(manager, job_id).await?;
    let audio_path = if job.input_type == InputType::Video {
        manager.update_step(job_id, "extract", StepState::Processing).await?;
        let out = scratch.path().join("extracted.wav");
        if let Err(e) = with_timeout(
            config.ffmpeg_timeout,
            media::extract_audio(&job.input_file, &out, config.ffmpeg_timeout),
        )
        .await
        {
            return Err(fail_step(manager, job_id, "extract", e).await);
        }
        manager.update_step(job_id, "extract", StepState::Done).await?;
        manager.update_progress(job_id, 20).await?;
        out
    } else {
        manager.update_progress(job_id, 10).await?;
        job.input_file.clone()
    };

    check_cancelled(manager, job_id).await?;
    manager.update_step(job_id, "transcribe", StepState::Processing).await?;
    let source_lang = if src == "auto" { None } else { Some(src) };
    let transcription = with_timeout(
        config.stt_timeout,
        stt::transcribe_with_fallback(config, &settings.stt_engine, &audio_path, source_lang, false),
    )
    .await;
    let transcription = match transcription {
        Ok(t) => t,
        Err(e) => return Err(fail_step(manager, job_id, "transcribe", e).await),
    };
    if transcription.text.trim().is_empty() {
        let err = Error::DataContract("transcription returned empty text".to_string());
        return Err(fail_step(manager, job_id, "transcribe", err).await);
    }
    manager.update_step(job_id, "transcribe", StepState::Done).await?;
    manager.update_progress(job_id, 40).await?;

    check_cancelled(manager, job_id).await?;
    manager.update_step(job_id, "translate", StepState::Processing).await?;
    let sync_mode = settings.sync_mode;
    let (translated_text, quality_result) = match translate_with_quality_loop(
        config,
        cache,
        &transcription.text,
        src,
        tgt,
        sync_mode,
        &settings.translation_engine,
        settings.verify_translation,
    )
    .await
    {
        Ok(r) => r,
        Err(e) => return Err(fail_step(manager, job_id, "translate", e).await),
    };
    manager.update_step(job_id, "translate", StepState::Done).await?;
    manager.update_progress(job_id, 58).await?;
    if let Some(quality) = quality_result {
        manager.set_quality_result(job_id, quality).await?;
    }

    crate::util::release_accelerator_memory("stt-translate-to-tts");

    check_cancelled(manager, job_id).await?;
    manager.update_step(job_id, "tts", StepState::Processing).await?;
    let speaker_ref = if settings.clone_voice { Some(audio_path.as_path()) } else { None };
    let tts_engine = if settings.tts_engine == "auto" {
        tts::resolve_auto_engine(config, tgt, settings.clone_voice)
    } else {
        settings.tts_engine.clone()
    };
    let tts_out = scratch.path().join("dub.wav");
    let synthesized = with_timeout(
        config.ffmpeg_timeout,
        tts::generate(config, &tts_engine, &translated_text, speaker_ref, &tts_out, tgt, None),
    )
    .await;
    if let Err(e) = synthesized {
        return Err(fail_step(manager, job_id, "tts", e).await);
    }
    manager.update_step(job_id, "tts", StepState::Done).await?;
    manager.update_progress(job_id, 80).await?;

    if job.input_type == InputType::Video {
        check_cancelled(manager, job_id).await?;
        manager.update_step(job_id, "merge", StepState::Processing).await?;
        let video_duration = media::probe_duration(&job.input_file).await;
        let audio_duration = media::probe_duration(&tts_out).await;
        let output_filename = format!("dubbed_{job_id}.mp4");
        let outputs_root = config.static_dir.join("outputs");
        tokio::fs::create_dir_all(&outputs_root).await.map_err(Error::Io)?;
        let output_path = outputs_root.join(&output_filename);

        let merged = with_timeout(
            config.ffmpeg_timeout,
            media::merge(
                &job.input_file,
                &tts_out,
                &output_path,
                sync_mode.into(),
                video_duration,
                audio_duration,
                config.ffmpeg_timeout,
            ),
        )
        .await;
        if let Err(e) = merged {
            return Err(fail_step(manager, job_id, "merge", e).await);
        }
        manager.update_step(job_id, "merge", StepState::Done).await?;
        manager.set_output_file(job_id, Some(output_filename), None).await?;
    } else {
        let output_filename = format!("dubbed_{job_id}.wav");
        let outputs_root = config.static_dir.join("outputs");
        tokio::fs::create_dir_all(&outputs_root).await.map_err(Error::Io)?;
        tokio::fs::copy(&tts_out, outputs_root.join(&output_filename))
            .await
            .map_err(Error::Io)?;
        manager.set_output_file(job_id, Some(output_filename), None).await?;
    }

    Ok(())
}

/// Extract (video only) → transcribe with segments → translate_segments
/// (batched, tagged, with the pipeline-level retry safety net) → quality
/// (optional, single evaluation) → write captions → embed soft subtitles,
/// falling back to burn-in.
async fn run_subtitle(
    manager: &JobManager,
    config: &Config,
    cache: &TranslationCache,
    job_id: &str,
    job: &Job,
) -> Result<()> {
    let scratch = tempfile::tempdir().map_err(Error::Io)?;
    let settings = &job.settings;
    let src = settings.source_lang.as_str();
    let tgt = settings.target_lang.as_str();

    check_cancelled(manager, job_id).await?;
    let audio_path = if job.input_type == InputType::Video {
        manager.update_step(job_id, "extract", StepState::Processing).await?;
        let out = scratch.path().join("extracted.wav");
        if let Err(e) = with_timeout(
            config.ffmpeg_timeout,
            media::extract_audio(&job.input_file, &out, config.ffmpeg_timeout),
        )
        .await
        {
            return Err(fail_step(manager, job_id, "extract", e).await);
        }
        manager.update_step(job_id, "extract", StepState::Done).await?;
        manager.update_progress(job_id, 20).await?;
        out
    } else {
        job.input_file.clone()
    };

    check_cancelled(manager, job_id).await?;
    manager.update_step(job_id, "transcribe", StepState::Processing).await?;
    let source_lang = if src == "auto" { None } else { Some(src) };
    let transcription = with_timeout(
        config.stt_timeout,
        stt::transcribe_with_fallback(config, &settings.stt_engine, &audio_path, source_lang, true),
    )
    .await;
    let transcription = match transcription {
        Ok(t) => t,
        Err(e) => return Err(fail_step(manager, job_id, "transcribe", e).await),
    };
    if transcription.segments.is_empty() {
        let err = Error::DataContract("transcription returned no segments".to_string());
        return Err(fail_step(manager, job_id, "transcribe", err).await);
    }
    manager.update_step(job_id, "transcribe", StepState::Done).await?;
    manager.update_progress(job_id, 40).await?;

    crate::util::release_accelerator_memory("stt-to-translate-subtitle");

    check_cancelled(manager, job_id).await?;
    manager.update_step(job_id, "translate", StepState::Processing).await?;
    let original_texts: Vec<String> = transcription.segments.iter().map(|s| s.text.clone()).collect();
    let translate_result = with_timeout(
        config.translation_timeout,
        translate::translate_segments(config, &original_texts, src, tgt, &settings.translation_engine, None),
    )
    .await;
    let (mut translated, success_rate) = match translate_result {
        Ok(r) => r,
        Err(e) => return Err(fail_step(manager, job_id, "translate", e).await),
    };

    if success_rate < SUBTITLE_RETRY_THRESHOLD_PCT {
        for (i, text) in translated.iter_mut().enumerate() {
            let original = &original_texts[i];
            if !original.trim().is_empty() && text == original {
                if let Ok(retried) =
                    translate::translate(config, original, src, tgt, SyncMode::Optimize, &settings.translation_engine)
                        .await
                {
                    *text = retried;
                }
            }
        }
    }
    manager.update_step(job_id, "translate", StepState::Done).await?;
    manager.update_progress(job_id, 60).await?;

    if settings.verify_translation {
        let joined_original = original_texts.join(" ");
        let joined_translated = translated.join(" ");
        if let Ok(quality) = with_timeout(
            config.quality_timeout,
            quality::evaluate(config, &joined_original, &joined_translated, src, tgt, QUALITY_ENGINE, QUALITY_FALLBACK_ENGINE),
        )
        .await
        {
            if quality.overall_score >= config.quality_floor {
                cache
                    .put(&joined_original, src, tgt, settings.sync_mode, joined_translated.clone(), Some(quality.clone()))
                    .await
                    .ok();
            }
            manager.set_quality_result(job_id, quality).await?;
        }
    }

    check_cancelled(manager, job_id).await?;
    manager.update_step(job_id, "captions", StepState::Processing).await?;
    let triples: Vec<(f64, f64, String)> = transcription
        .segments
        .iter()
        .zip(translated.iter())
        .map(|(seg, text)| (seg.start, seg.end, text.clone()))
        .collect();
    let srt_document = subtitle::generate_srt(&triples);
    let captions_filename = format!("subtitle_{job_id}.srt");
    let outputs_root = config.static_dir.join("outputs");
    tokio::fs::create_dir_all(&outputs_root).await.map_err(Error::Io)?;
    let captions_path = outputs_root.join(&captions_filename);
    tokio::fs::write(&captions_path, srt_document).await.map_err(Error::Io)?;
    manager.update_step(job_id, "captions", StepState::Done).await?;
    manager.update_progress(job_id, 70).await?;

    check_cancelled(manager, job_id).await?;
    manager.update_step(job_id, "embed", StepState::Processing).await?;
    let output_filename = format!("subtitle_{job_id}.mp4");
    let output_path = outputs_root.join(&output_filename);
    let embedded = with_timeout(
        config.soft_embed_timeout,
        media::embed_soft_subtitles(&job.input_file, &captions_path, &output_path, tgt, config.soft_embed_timeout),
    )
    .await;
    if embedded.is_err() {
        tracing::warn!("soft-embed failed for job {job_id}, falling back to burn-in");
        if let Err(e) = with_timeout(
            config.ffmpeg_timeout,
            media::burn_subtitles(&job.input_file, &captions_path, &output_path, config.ffmpeg_timeout),
        )
        .await
        {
            return Err(fail_step(manager, job_id, "embed", e).await);
        }
    }
    manager.update_step(job_id, "embed", StepState::Done).await?;
    manager.set_output_file(job_id, Some(output_filename), Some(captions_filename)).await?;

    Ok(())
}

/// Translate, then (dubbing mode, when `verify_translation` is set) run at
/// most 3 evaluate→refine rounds. Tracks the best-scoring candidate across
/// all rounds (ties favor the earlier round); a cache hit above the
/// admission floor short-circuits translation entirely.
async fn translate_with_quality_loop(
    config: &Config,
    cache: &TranslationCache,
    text: &str,
    src: &str,
    tgt: &str,
    sync_mode: SyncMode,
    engine: &str,
    verify_translation: bool,
) -> Result<(String, Option<QualityResult>)> {
    if let Some(hit) = cache.get(text, src, tgt, sync_mode, config.quality_floor).await {
        return Ok((hit.translated_text, hit.quality_result));
    }

    let mut translated = with_timeout(
        config.translation_timeout,
        translate::translate(config, text, src, tgt, sync_mode, engine),
    )
    .await?;

    if !verify_translation {
        cache.put(text, src, tgt, sync_mode, translated.clone(), None).await.ok();
        return Ok((translated, None));
    }

    let mut best_text = translated.clone();
    let mut best_quality: Option<QualityResult> = None;

    for iteration in 0..MAX_QUALITY_ITERATIONS {
        let quality = with_timeout(
            config.quality_timeout,
            quality::evaluate(config, text, &translated, src, tgt, QUALITY_ENGINE, QUALITY_FALLBACK_ENGINE),
        )
        .await?;

        let is_best = best_quality
            .as_ref()
            .map(|b| quality.overall_score > b.overall_score)
            .unwrap_or(true);
        if is_best {
            best_quality = Some(quality.clone());
            best_text = translated.clone();
        }

        if quality.overall_score >= QUALITY_EARLY_STOP || iteration + 1 == MAX_QUALITY_ITERATIONS {
            break;
        }

        let refined = translate::refine(config, text, &translated, src, tgt, &quality.issues, sync_mode, engine).await;
        let refined_len = refined.chars().count() as f64;
        let previous_len = translated.chars().count().max(1) as f64;
        let truncation_ok = refined_len / previous_len >= TRUNCATION_GUARD_RATIO;
        let terms_ok = quality::key_terms_preserved(text, &refined);

        translated = if truncation_ok && terms_ok {
            refined
        } else {
            with_timeout(
                config.translation_timeout,
                translate::translate(config, text, src, tgt, sync_mode, engine),
            )
            .await?
        };
    }

    let overall = best_quality.as_ref().map(|q| q.overall_score).unwrap_or(0.0);
    if overall >= config.quality_floor {
        cache.put(text, src, tgt, sync_mode, best_text.clone(), best_quality.clone()).await.ok();
    }

    Ok((best_text, best_quality))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn with_timeout_surfaces_timeout_error() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn with_timeout_passes_through_fast_result() {
        let result: Result<i32> = with_timeout(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
