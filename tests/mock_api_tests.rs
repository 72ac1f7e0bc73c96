//! Mock-server tests for the locally-hosted provider adapters (translation
//! and STT), which both front an HTTP endpoint configurable via env var.
//! Serialized behind a process-wide mutex since the adapters read that env
//! var once at construction time.

use dubcore::config::Config;
use serde_json::json;
use std::sync::Mutex;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

static ENV_GUARD: Mutex<()> = Mutex::new(());

#[tokio::test]
async fn local_chat_provider_parses_a_successful_reply() {
    let _guard = ENV_GUARD.lock().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "안녕하세요"}}]
        })))
        .mount(&server)
        .await;

    std::env::set_var("DUBCORE_LOCAL_LLM_URL", server.uri());
    let provider = dubcore::translate::create_provider("local", &Config::default()).unwrap();
    let reply = provider.chat(Some("translate to Korean"), "hello").await.unwrap();
    std::env::remove_var("DUBCORE_LOCAL_LLM_URL");

    assert_eq!(reply, "안녕하세요");
}

#[tokio::test]
async fn local_chat_provider_surfaces_a_transient_error_on_5xx() {
    let _guard = ENV_GUARD.lock().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    std::env::set_var("DUBCORE_LOCAL_LLM_URL", server.uri());
    let provider = dubcore::translate::create_provider("local", &Config::default()).unwrap();
    let result = provider.chat(None, "hello").await;
    std::env::remove_var("DUBCORE_LOCAL_LLM_URL");

    assert!(result.is_err());
}

#[tokio::test]
async fn local_stt_provider_parses_segments_when_requested() {
    let _guard = ENV_GUARD.lock().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "hello world",
            "segments": [{"start": 0.0, "end": 1.2, "text": "hello world"}]
        })))
        .mount(&server)
        .await;

    std::env::set_var("DUBCORE_LOCAL_STT_URL", server.uri());
    let provider = dubcore::stt::create_provider("local", &Config::default()).unwrap();
    let result = provider
        .transcribe(std::path::Path::new("/tmp/nonexistent.wav"), Some("en"), true)
        .await
        .unwrap();
    std::env::remove_var("DUBCORE_LOCAL_STT_URL");

    assert_eq!(result.text, "hello world");
    assert_eq!(result.segments.len(), 1);
}

#[tokio::test]
async fn local_stt_provider_drops_segments_when_not_requested() {
    let _guard = ENV_GUARD.lock().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "hello world",
            "segments": [{"start": 0.0, "end": 1.2, "text": "hello world"}]
        })))
        .mount(&server)
        .await;

    std::env::set_var("DUBCORE_LOCAL_STT_URL", server.uri());
    let provider = dubcore::stt::create_provider("local", &Config::default()).unwrap();
    let result = provider
        .transcribe(std::path::Path::new("/tmp/nonexistent.wav"), Some("en"), false)
        .await
        .unwrap();
    std::env::remove_var("DUBCORE_LOCAL_STT_URL");

    assert!(result.segments.is_empty());
}
