//! The job data model (component data model, `Job`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MAX_LOG_MESSAGE_LEN: usize = 500;
pub const MAX_ERROR_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Processing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Optimize,
    SpeedAudio,
    Stretch,
}

impl std::str::FromStr for SyncMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "optimize" => Ok(SyncMode::Optimize),
            "speed_audio" => Ok(SyncMode::SpeedAudio),
            "stretch" => Ok(SyncMode::Stretch),
            other => Err(format!("unknown sync_mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Dubbing,
    Subtitle,
}

impl std::str::FromStr for JobMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dubbing" => Ok(JobMode::Dubbing),
            "subtitle" => Ok(JobMode::Subtitle),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Audio,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub source_lang: String,
    pub target_lang: String,
    pub clone_voice: bool,
    pub verify_translation: bool,
    pub sync_mode: SyncMode,
    pub translation_engine: String,
    pub stt_engine: String,
    pub tts_engine: String,
    pub mode: JobMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, now: chrono::DateTime<chrono::Utc>) -> Self {
        let mut message: String = message.into();
        if message.chars().count() > MAX_LOG_MESSAGE_LEN {
            message = message.chars().take(MAX_LOG_MESSAGE_LEN).collect();
        }
        Self {
            timestamp: now,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Approved,
    ReviewNeeded,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub accuracy: f64,
    pub naturalness: f64,
    pub dubbing_fit: f64,
    pub consistency: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityResult {
    pub overall_score: f64,
    pub breakdown: QualityBreakdown,
    pub issues: Vec<String>,
    pub recommendation: Recommendation,
}

impl QualityResult {
    pub fn recommendation_for(score: f64) -> Recommendation {
        if score >= 85.0 {
            Recommendation::Approved
        } else if score < 60.0 {
            Recommendation::Reject
        } else {
            Recommendation::ReviewNeeded
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: String,
    pub steps: BTreeMap<String, StepState>,
    pub settings: Settings,
    pub input_file: PathBuf,
    pub input_filename: String,
    pub input_type: InputType,
    pub output_file: Option<String>,
    pub captions_file: Option<String>,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
    pub quality_result: Option<QualityResult>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Stage key sets per mode/input_type, in execution order (I2: `current_step`
/// always names a key in `steps`).
pub fn stage_keys(mode: JobMode, input_type: InputType) -> Vec<&'static str> {
    match (mode, input_type) {
        (JobMode::Dubbing, InputType::Video) => {
            vec!["extract", "transcribe", "translate", "tts", "merge"]
        }
        (JobMode::Dubbing, InputType::Audio) => vec!["transcribe", "translate", "tts"],
        (JobMode::Subtitle, InputType::Video) => vec![
            "extract",
            "transcribe",
            "translate",
            "captions",
            "embed",
        ],
        (JobMode::Subtitle, InputType::Audio) => {
            // ControlPlane rejects this combination at admission time (4.I);
            // kept total so `stage_keys` never panics.
            vec!["transcribe", "translate", "captions"]
        }
    }
}

impl Job {
    pub fn new(
        id: String,
        settings: Settings,
        input_file: PathBuf,
        input_filename: String,
        input_type: InputType,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let keys = stage_keys(settings.mode, input_type);
        let steps = keys
            .iter()
            .map(|k| (k.to_string(), StepState::Pending))
            .collect::<BTreeMap<_, _>>();
        let current_step = keys.first().map(|s| s.to_string()).unwrap_or_default();
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            current_step,
            steps,
            settings,
            input_file,
            input_filename,
            input_type,
            output_file: None,
            captions_file: None,
            logs: Vec::new(),
            error: None,
            quality_result: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// (I3) progress is non-decreasing except on a fresh job; callers pass
    /// the intended new value and this clamps it.
    pub fn advance_progress(&mut self, new_progress: u8) {
        let clamped = new_progress.min(100);
        if clamped > self.progress {
            self.progress = clamped;
        }
    }

    pub fn set_step(&mut self, step: &str, state: StepState) -> Result<()> {
        let entry = self
            .steps
            .get_mut(step)
            .ok_or_else(|| Error::DataContract(format!("unknown step: {step}")))?;
        *entry = state;
        self.current_step = step.to_string();
        Ok(())
    }

    pub fn append_log(&mut self, message: impl Into<String>, now: chrono::DateTime<chrono::Utc>, max_logs: usize) {
        self.logs.push(LogEntry::new(message, now));
        if self.logs.len() > max_logs {
            // Evict the oldest 10% on overflow (I7: buffer stays O(N)).
            let evict = (max_logs / 10).max(1);
            self.logs.drain(0..evict.min(self.logs.len()));
        }
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        let mut error: String = error.into();
        if error.chars().count() > MAX_ERROR_LEN {
            error = error.chars().take(MAX_ERROR_LEN).collect();
        }
        self.error = Some(error);
    }

    pub fn is_subtitle_mode(&self) -> bool {
        matches!(self.settings.mode, JobMode::Subtitle)
    }

    /// (I4) input_file must resolve to a regular file strictly under `root`.
    pub fn validate_input_under(&self, root: &Path) -> Result<()> {
        crate::media::path_safety::ensure_under_root(&self.input_file, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            source_lang: "en".into(),
            target_lang: "ko".into(),
            clone_voice: false,
            verify_translation: false,
            sync_mode: SyncMode::Optimize,
            translation_engine: "local".into(),
            stt_engine: "local".into(),
            tts_engine: "auto".into(),
            mode: JobMode::Dubbing,
        }
    }

    #[test]
    fn new_job_has_pending_steps_in_order() {
        let job = Job::new(
            "id".into(),
            settings(),
            PathBuf::from("/uploads/in.mp4"),
            "in.mp4".into(),
            InputType::Video,
            chrono::Utc::now(),
        );
        assert_eq!(job.current_step, "extract");
        assert_eq!(job.steps.len(), 5);
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn progress_never_decreases() {
        let mut job = Job::new(
            "id".into(),
            settings(),
            PathBuf::from("/uploads/in.mp4"),
            "in.mp4".into(),
            InputType::Video,
            chrono::Utc::now(),
        );
        job.advance_progress(40);
        job.advance_progress(20);
        assert_eq!(job.progress, 40);
        job.advance_progress(60);
        assert_eq!(job.progress, 60);
    }

    #[test]
    fn set_step_rejects_unknown_key() {
        let mut job = Job::new(
            "id".into(),
            settings(),
            PathBuf::from("/uploads/in.mp4"),
            "in.mp4".into(),
            InputType::Video,
            chrono::Utc::now(),
        );
        assert!(job.set_step("bogus", StepState::Done).is_err());
    }

    #[test]
    fn log_overflow_evicts_oldest_tenth() {
        let mut job = Job::new(
            "id".into(),
            settings(),
            PathBuf::from("/uploads/in.mp4"),
            "in.mp4".into(),
            InputType::Video,
            chrono::Utc::now(),
        );
        for i in 0..12 {
            job.append_log(format!("msg {i}"), chrono::Utc::now(), 10);
        }
        assert!(job.logs.len() <= 10);
        assert!(job.logs.last().unwrap().message.starts_with("msg 11"));
    }

    #[test]
    fn log_message_truncated_to_500_chars() {
        let mut job = Job::new(
            "id".into(),
            settings(),
            PathBuf::from("/uploads/in.mp4"),
            "in.mp4".into(),
            InputType::Video,
            chrono::Utc::now(),
        );
        job.append_log("x".repeat(600), chrono::Utc::now(), 1000);
        assert_eq!(job.logs[0].message.chars().count(), MAX_LOG_MESSAGE_LEN);
    }

    #[test]
    fn audio_input_dubbing_skips_extract_and_merge() {
        let keys = stage_keys(JobMode::Dubbing, InputType::Audio);
        assert_eq!(keys, vec!["transcribe", "translate", "tts"]);
    }
}
