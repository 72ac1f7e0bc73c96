//! Integration tests exercising the public crate surface across module
//! boundaries, without requiring external provider credentials.

use dubcore::config::Config;
use dubcore::job::{InputType, JobMode, JobStatus, Settings, StepState, SyncMode};
use dubcore::manager::JobManager;

fn settings(mode: JobMode) -> Settings {
    Settings {
        source_lang: "en".to_string(),
        target_lang: "ko".to_string(),
        clone_voice: false,
        verify_translation: false,
        sync_mode: SyncMode::Optimize,
        translation_engine: "local".to_string(),
        stt_engine: "local".to_string(),
        tts_engine: "auto".to_string(),
        mode,
    }
}

#[tokio::test]
async fn job_lifecycle_round_trips_through_the_manager() {
    let dir = tempfile::tempdir().unwrap();
    let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24)
        .await
        .unwrap();

    let job = manager
        .create(
            settings(JobMode::Dubbing),
            dir.path().join("uploads/input.mp4"),
            "input.mp4".to_string(),
            InputType::Video,
        )
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    manager.update_status(&job.id, JobStatus::Processing).await.unwrap();
    manager.update_step(&job.id, "extract", StepState::Done).await.unwrap();
    manager.update_progress(&job.id, 20).await.unwrap();

    let fetched = manager.get(&job.id).await.unwrap();
    assert_eq!(fetched.status, JobStatus::Processing);
    assert_eq!(fetched.steps.get("extract"), Some(&StepState::Done));
    assert_eq!(fetched.progress, 20);
}

#[tokio::test]
async fn restart_recovery_marks_processing_jobs_failed() {
    let dir = tempfile::tempdir().unwrap();
    let job_id = {
        let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24)
            .await
            .unwrap();
        let job = manager
            .create(
                settings(JobMode::Subtitle),
                dir.path().join("uploads/input.mp4"),
                "input.mp4".to_string(),
                InputType::Video,
            )
            .await
            .unwrap();
        manager.update_status(&job.id, JobStatus::Processing).await.unwrap();
        job.id
    };

    let reloaded = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24)
        .await
        .unwrap();
    let job = reloaded.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("restart"));
}

#[tokio::test]
async fn cancel_is_rejected_once_a_job_reaches_a_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24)
        .await
        .unwrap();
    let job = manager
        .create(
            settings(JobMode::Dubbing),
            dir.path().join("uploads/input.wav"),
            "input.wav".to_string(),
            InputType::Audio,
        )
        .await
        .unwrap();
    manager.update_status(&job.id, JobStatus::Completed).await.unwrap();
    assert!(manager.cancel(&job.id).await.is_err());
}

#[test]
fn srt_round_trip_preserves_timing_and_text() {
    let segments = vec![
        (0.0, 1.5, "Hello there".to_string()),
        (1.5, 2.0, String::new()),
        (2.0, 4.25, "General Kenobi".to_string()),
    ];
    let document = dubcore::subtitle::generate_srt(&segments);
    let parsed = dubcore::subtitle::parse_srt(&document);
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].index, 1);
    assert_eq!(parsed[1].index, 2);
    assert_eq!(parsed[1].text, "General Kenobi");
}

#[tokio::test]
async fn translation_cache_admits_only_above_the_quality_floor() {
    use dubcore::job::{QualityBreakdown, QualityResult, Recommendation};

    let dir = tempfile::tempdir().unwrap();
    let cache = dubcore::cache::TranslationCache::new(dir.path());
    let good = QualityResult {
        overall_score: 90.0,
        breakdown: QualityBreakdown {
            accuracy: 90.0,
            naturalness: 90.0,
            dubbing_fit: 90.0,
            consistency: 90.0,
        },
        issues: Vec::new(),
        recommendation: Recommendation::Approved,
    };

    cache
        .put("hello", "en", "ko", SyncMode::Optimize, "안녕하세요".to_string(), Some(good))
        .await
        .unwrap();

    let hit = cache.get("hello", "en", "ko", SyncMode::Optimize, 60.0).await;
    assert_eq!(hit.unwrap().translated_text, "안녕하세요");
    assert!(cache.get("hello", "en", "ko", SyncMode::Optimize, 95.0).await.is_none());
}

#[test]
fn default_config_loads_without_an_environment() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(!config.auth_enabled());
}
