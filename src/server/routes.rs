//! HTTP handlers for the job lifecycle and system status routes (§4.I, §6).

use crate::job::{InputType, JobMode, Settings, SyncMode};
use crate::server::upload::{classify_extension, sanitize_filename, save_streamed, SaveError};
use crate::server::AppState;
use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::str::FromStr;

const STT_ENGINES: &[&str] = &["local", "hosted-stt-b", "hosted-stt-c", "hosted-llm-a"];
const TRANSLATION_ENGINES: &[&str] = &["local", "hosted-llm-a", "hosted-llm-b"];
const TTS_ENGINES: &[&str] = &[
    "auto",
    "clone-capable",
    "network-neural-a",
    "lightweight-local-neural",
    "hosted-clone",
    "hosted-preset",
];

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

/// Credential name `Credentials::has` expects for an engine the client
/// selected, or `None` when the engine needs no credential (local/free).
fn credential_key_for(kind: &str, engine: &str) -> Option<&'static str> {
    match (kind, engine) {
        ("stt", "hosted-stt-b") => Some("hosted-stt-b"),
        ("stt", "hosted-stt-c") => Some("hosted-stt-c"),
        ("stt", "hosted-llm-a") => Some("hosted-llm-a"),
        ("translation", "hosted-llm-a") => Some("hosted-llm-a"),
        ("translation", "hosted-llm-b") => Some("hosted-llm-b"),
        ("tts", "hosted-clone") => Some("hosted-tts-clone"),
        ("tts", "hosted-preset") => Some("hosted-tts-preset"),
        _ => None,
    }
}

pub async fn create_job(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    if state.manager.active_count().await >= state.config.max_concurrent_jobs {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "too many jobs in flight");
    }

    let mut source_lang = "auto".to_string();
    let mut target_lang = String::new();
    let mut clone_voice = false;
    let mut verify_translation = false;
    let mut sync_mode = "optimize".to_string();
    let mut translation_engine = state.config.default_translation_engine.clone();
    let mut stt_engine = state.config.default_stt_engine.clone();
    let mut tts_engine = state.config.default_tts_engine.clone();
    let mut mode = "dubbing".to_string();
    let mut saved_path: Option<std::path::PathBuf> = None;
    let mut original_filename = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        };
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                original_filename = field.file_name().unwrap_or("upload").to_string();
                let (safe_name, ext) = match sanitize_filename(&original_filename) {
                    Ok(v) => v,
                    Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
                };
                if classify_extension(&ext).is_err() {
                    return error_response(StatusCode::BAD_REQUEST, format!("unsupported extension: {ext}"));
                }
                let uploads_root = state.config.static_dir.join("uploads");
                if let Err(e) = tokio::fs::create_dir_all(&uploads_root).await {
                    return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
                }
                let dest = uploads_root.join(&safe_name);
                match save_streamed(field, &dest, state.config.max_file_size).await {
                    Ok(_) => saved_path = Some(dest),
                    Err(SaveError::TooLarge) => {
                        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "file exceeds max_file_size")
                    }
                    Err(SaveError::Io(e)) => {
                        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                    }
                }
            }
            "source_lang" => source_lang = field_text(field).await,
            "target_lang" => target_lang = field_text(field).await,
            "clone_voice" => clone_voice = field_text(field).await == "true",
            "verify_translation" => verify_translation = field_text(field).await == "true",
            "sync_mode" => sync_mode = field_text(field).await,
            "translation_engine" => translation_engine = field_text(field).await,
            "stt_engine" => stt_engine = field_text(field).await,
            "tts_engine" => tts_engine = field_text(field).await,
            "mode" => mode = field_text(field).await,
            _ => {}
        }
    }

    let Some(input_file) = saved_path else {
        return error_response(StatusCode::BAD_REQUEST, "missing required field: file");
    };
    let cleanup_on_reject = |path: std::path::PathBuf| async move {
        let _ = tokio::fs::remove_file(&path).await;
    };

    let Ok(job_mode) = JobMode::from_str(&mode) else {
        cleanup_on_reject(input_file).await;
        return error_response(StatusCode::BAD_REQUEST, format!("unknown mode: {mode}"));
    };
    let Ok(parsed_sync_mode) = SyncMode::from_str(&sync_mode) else {
        cleanup_on_reject(input_file).await;
        return error_response(StatusCode::BAD_REQUEST, format!("unknown sync_mode: {sync_mode}"));
    };
    if source_lang != "auto" && !state.config.language_allow_list.contains(&source_lang) {
        cleanup_on_reject(input_file).await;
        return error_response(StatusCode::BAD_REQUEST, format!("unsupported source_lang: {source_lang}"));
    }
    if target_lang == "auto" || !state.config.language_allow_list.contains(&target_lang) {
        cleanup_on_reject(input_file).await;
        return error_response(StatusCode::BAD_REQUEST, format!("unsupported target_lang: {target_lang}"));
    }
    if !STT_ENGINES.contains(&stt_engine.as_str()) {
        cleanup_on_reject(input_file).await;
        return error_response(StatusCode::BAD_REQUEST, format!("unknown stt_engine: {stt_engine}"));
    }
    if !TRANSLATION_ENGINES.contains(&translation_engine.as_str()) {
        cleanup_on_reject(input_file).await;
        return error_response(StatusCode::BAD_REQUEST, format!("unknown translation_engine: {translation_engine}"));
    }
    if !TTS_ENGINES.contains(&tts_engine.as_str()) {
        cleanup_on_reject(input_file).await;
        return error_response(StatusCode::BAD_REQUEST, format!("unknown tts_engine: {tts_engine}"));
    }

    let ext = input_file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let input_type = classify_extension(&ext).unwrap_or(InputType::Video);
    if job_mode == JobMode::Subtitle && input_type == InputType::Audio {
        cleanup_on_reject(input_file).await;
        return error_response(StatusCode::BAD_REQUEST, "subtitle mode does not accept audio input");
    }

    let mut missing = Vec::new();
    for (kind, engine) in [("stt", stt_engine.as_str()), ("translation", translation_engine.as_str()), ("tts", tts_engine.as_str())] {
        if let Some(key) = credential_key_for(kind, engine) {
            if !state.config.credentials.has(key) {
                missing.push(key.to_string());
            }
        }
    }
    if !missing.is_empty() {
        cleanup_on_reject(input_file).await;
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("missing credentials: {}", missing.join(", ")),
        );
    }

    let settings = Settings {
        source_lang,
        target_lang,
        clone_voice,
        verify_translation,
        sync_mode: parsed_sync_mode,
        translation_engine,
        stt_engine,
        tts_engine,
        mode: job_mode,
    };

    let input_filename = input_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or(original_filename);

    let job = match state.manager.create(settings, input_file.clone(), input_filename, input_type).await {
        Ok(job) => job,
        Err(e) => {
            cleanup_on_reject(input_file).await;
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.user_message());
        }
    };

    let manager = state.manager.clone();
    let config = state.config.clone();
    let cache = state.cache.clone();
    let job_id = job.id.clone();
    tokio::spawn(async move {
        crate::pipeline::run_job(manager, config, cache, job_id).await;
    });

    (StatusCode::ACCEPTED, Json(job)).into_response()
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> String {
    field.text().await.unwrap_or_default()
}

pub async fn get_job(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Response {
    match state.manager.get(&id).await {
        Some(job) => Json(job).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("job not found: {id}")),
    }
}

pub async fn cancel_job(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Response {
    match state.manager.cancel(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(crate::error::Error::NotFound(msg)) => error_response(StatusCode::NOT_FOUND, msg),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.user_message()),
    }
}

pub async fn download_job(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Response {
    let Some(job) = state.manager.get(&id).await else {
        return error_response(StatusCode::NOT_FOUND, format!("job not found: {id}"));
    };
    let Some(output_file) = &job.output_file else {
        return error_response(StatusCode::NOT_FOUND, "job has no output artifact yet");
    };
    let path = state.config.static_dir.join("outputs").join(output_file);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(_) => return error_response(StatusCode::NOT_FOUND, "artifact missing on disk"),
    };

    let ext = std::path::Path::new(output_file)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    let download_name = format!("videovoice_{}.{ext}", short_hex(&job.id));
    let headers = [
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{download_name}\"")),
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
    ];
    (headers, bytes).into_response()
}

/// First 8 hex characters of the job id, used for the download filename
/// (§6: `videovoice_<8hex><ext>`).
fn short_hex(job_id: &str) -> String {
    job_id.chars().filter(|c| c.is_ascii_hexdigit()).take(8).collect()
}

pub async fn get_srt(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Response {
    let Some(job) = state.manager.get(&id).await else {
        return error_response(StatusCode::NOT_FOUND, format!("job not found: {id}"));
    };
    if job.settings.mode != JobMode::Subtitle {
        return error_response(StatusCode::BAD_REQUEST, "job is not subtitle mode");
    }
    let Some(captions_file) = &job.captions_file else {
        return error_response(StatusCode::NOT_FOUND, "captions not ready yet");
    };
    let path = state.config.static_dir.join("outputs").join(captions_file);
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/srt; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(_) => error_response(StatusCode::NOT_FOUND, "captions file missing on disk"),
    }
}

#[derive(Serialize)]
struct SystemStatus {
    active_jobs: usize,
    total_jobs: usize,
    max_concurrent_jobs: usize,
    free_vram_gb: f64,
    credentials_available: Vec<String>,
}

pub async fn system_status(State(state): State<AppState>) -> Response {
    let all_credentials = [
        "hosted-stt-b",
        "hosted-stt-c",
        "hosted-llm-a",
        "hosted-llm-b",
        "hosted-tts-clone",
        "hosted-tts-preset",
    ];
    let credentials_available = all_credentials
        .iter()
        .filter(|name| state.config.credentials.has(name))
        .map(|name| name.to_string())
        .collect();

    Json(SystemStatus {
        active_jobs: state.manager.active_count().await,
        total_jobs: state.manager.total_count().await,
        max_concurrent_jobs: state.config.max_concurrent_jobs,
        free_vram_gb: crate::util::free_vram_gb(),
        credentials_available,
    })
    .into_response()
}
