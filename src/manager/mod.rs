//! JobManager (component H): the single source of truth for job state.
//! Every mutation goes through one lock and is persisted atomically.

use crate::error::{Error, Result};
use crate::job::{InputType, Job, JobStatus, QualityResult, Settings, StepState};
use crate::media::path_safety::ensure_under_root;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

const PERSISTED_LOG_TAIL: usize = 20;
const RESTART_INTERRUPTED_MESSAGE: &str = "server restart interrupted job";

struct Registry {
    jobs: HashMap<String, Job>,
    cancelled: HashSet<String>,
}

/// Durable snapshot of the registry. Logs are truncated to their tail so
/// the file stays small regardless of a job's full in-memory log buffer.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    jobs: Vec<Job>,
}

pub struct JobManager {
    registry: RwLock<Registry>,
    static_dir: PathBuf,
    max_jobs: usize,
    max_logs_per_job: usize,
    job_expiration_hours: i64,
}

fn registry_path(static_dir: &Path) -> PathBuf {
    static_dir.join("jobs.json")
}

/// Any job id that doesn't parse as a UUID is treated as not-found by every
/// manager operation rather than erroring.
fn is_valid_job_id(id: &str) -> bool {
    uuid::Uuid::parse_str(id).is_ok()
}

impl JobManager {
    /// Load the persisted registry (if any), forcing every non-terminal job
    /// to `failed` with a restart-interrupted diagnostic (§8 scenario 6).
    pub async fn load(
        static_dir: PathBuf,
        max_jobs: usize,
        max_logs_per_job: usize,
        job_expiration_hours: i64,
    ) -> Result<Arc<Self>> {
        let path = registry_path(&static_dir);
        let mut jobs = HashMap::new();

        if let Ok(raw) = tokio::fs::read(&path).await {
            if let Ok(snapshot) = serde_json::from_slice::<Snapshot>(&raw) {
                for mut job in snapshot.jobs {
                    if !job.status.is_terminal() {
                        job.status = JobStatus::Failed;
                        job.set_error(RESTART_INTERRUPTED_MESSAGE);
                        job.append_log(RESTART_INTERRUPTED_MESSAGE, chrono::Utc::now(), max_logs_per_job);
                        job.completed_at = Some(chrono::Utc::now());
                    }
                    jobs.insert(job.id.clone(), job);
                }
            } else {
                tracing::warn!("jobs.json was unreadable; starting with an empty registry");
            }
        }

        let manager = Arc::new(Self {
            registry: RwLock::new(Registry { jobs, cancelled: HashSet::new() }),
            static_dir,
            max_jobs,
            max_logs_per_job,
            job_expiration_hours,
        });
        manager.persist().await?;
        Ok(manager)
    }

    async fn persist(&self) -> Result<()> {
        let registry = self.registry.read().await;
        let jobs: Vec<Job> = registry
            .jobs
            .values()
            .map(|job| {
                let mut snapshot = job.clone();
                let tail_start = snapshot.logs.len().saturating_sub(PERSISTED_LOG_TAIL);
                snapshot.logs.drain(0..tail_start);
                snapshot
            })
            .collect();
        drop(registry);

        let body = serde_json::to_vec_pretty(&Snapshot { jobs })?;
        tokio::fs::create_dir_all(&self.static_dir).await.map_err(Error::Io)?;
        let tmp_path = self.static_dir.join(format!("jobs.json.tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp_path, &body).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp_path, registry_path(&self.static_dir)).await.map_err(Error::Io)?;
        Ok(())
    }

    /// Creates a job, enforcing the registry capacity policy: expire first,
    /// then evict oldest terminal jobs if still over the high-water mark.
    pub async fn create(
        &self,
        settings: Settings,
        input_file: PathBuf,
        input_filename: String,
        input_type: InputType,
    ) -> Result<Job> {
        self.enforce_capacity().await?;

        let id = uuid::Uuid::new_v4().to_string();
        let job = Job::new(id.clone(), settings, input_file, input_filename, input_type, chrono::Utc::now());

        let mut registry = self.registry.write().await;
        registry.jobs.insert(id, job.clone());
        drop(registry);
        self.persist().await?;
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        if !is_valid_job_id(id) {
            return None;
        }
        self.registry.read().await.jobs.get(id).cloned()
    }

    pub async fn update_status(&self, id: &str, status: JobStatus) -> Result<()> {
        self.mutate(id, |job| {
            job.status = status;
            if status.is_terminal() {
                job.completed_at = Some(chrono::Utc::now());
            }
        })
        .await
    }

    pub async fn update_progress(&self, id: &str, progress: u8) -> Result<()> {
        self.mutate(id, |job| job.advance_progress(progress)).await
    }

    pub async fn update_step(&self, id: &str, step: &str, state: StepState) -> Result<()> {
        self.mutate(id, |job| {
            if let Err(e) = job.set_step(step, state) {
                tracing::warn!("update_step({id}, {step}): {e}");
            }
        })
        .await
    }

    pub async fn append_log(&self, id: &str, message: impl Into<String>) -> Result<()> {
        let max_logs = self.max_logs_per_job;
        let message = message.into();
        self.mutate(id, move |job| job.append_log(message, chrono::Utc::now(), max_logs))
            .await
    }

    pub async fn set_output_file(&self, id: &str, output_file: Option<String>, captions_file: Option<String>) -> Result<()> {
        self.mutate(id, move |job| {
            job.output_file = output_file;
            job.captions_file = captions_file;
        })
        .await
    }

    pub async fn set_quality_result(&self, id: &str, quality_result: QualityResult) -> Result<()> {
        self.mutate(id, move |job| job.quality_result = Some(quality_result)).await
    }

    pub async fn set_error(&self, id: &str, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.mutate(id, move |job| job.set_error(error)).await
    }

    /// Flips status to cancelled, adds the id to the cancel set, and appends
    /// a log entry. Rejected (400-equivalent) when the job is already
    /// terminal.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        if !is_valid_job_id(id) {
            return Err(Error::NotFound(format!("job {id}")));
        }
        let max_logs = self.max_logs_per_job;
        let mut registry = self.registry.write().await;
        let job = registry
            .jobs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        if job.status.is_terminal() {
            return Err(Error::Validation(format!("job {id} is already terminal")));
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(chrono::Utc::now());
        job.append_log("cancelled by user", chrono::Utc::now(), max_logs);
        registry.cancelled.insert(id.to_string());
        drop(registry);
        self.persist().await
    }

    pub async fn is_cancelled(&self, id: &str) -> bool {
        self.registry.read().await.cancelled.contains(id)
    }

    pub async fn get_input_file(&self, id: &str) -> Option<PathBuf> {
        self.get(id).await.map(|job| job.input_file)
    }

    pub async fn active_count(&self) -> usize {
        self.registry
            .read()
            .await
            .jobs
            .values()
            .filter(|j| !j.status.is_terminal())
            .count()
    }

    pub async fn total_count(&self) -> usize {
        self.registry.read().await.jobs.len()
    }

    async fn mutate(&self, id: &str, f: impl FnOnce(&mut Job)) -> Result<()> {
        if !is_valid_job_id(id) {
            return Ok(());
        }
        {
            let mut registry = self.registry.write().await;
            match registry.jobs.get_mut(id) {
                Some(job) => f(job),
                None => return Ok(()),
            }
        }
        self.persist().await
    }

    /// Expire jobs older than `job_expiration_hours`, then (if the registry
    /// is still at or above `max_jobs`) evict the oldest terminal jobs.
    /// Both paths delete the job's input/output/captions files, verified to
    /// be under the upload/output roots before removal.
    async fn enforce_capacity(&self) -> Result<()> {
        if self.registry.read().await.jobs.len() < self.max_jobs {
            return Ok(());
        }
        self.cleanup_expired().await?;
        if self.registry.read().await.jobs.len() < self.max_jobs {
            return Ok(());
        }

        let mut registry = self.registry.write().await;
        let mut terminal_ids: Vec<(String, chrono::DateTime<chrono::Utc>)> = registry
            .jobs
            .values()
            .filter(|j| j.status.is_terminal())
            .map(|j| (j.id.clone(), j.created_at))
            .collect();
        terminal_ids.sort_by_key(|(_, created_at)| *created_at);

        let overflow = registry.jobs.len() + 1 - self.max_jobs;
        let to_evict: Vec<Job> = terminal_ids
            .into_iter()
            .take(overflow)
            .filter_map(|(id, _)| registry.jobs.remove(&id))
            .collect();
        drop(registry);

        for job in &to_evict {
            self.delete_job_files(job).await;
        }
        Ok(())
    }

    pub async fn cleanup_expired(&self) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(self.job_expiration_hours);
        let mut registry = self.registry.write().await;
        let expired: Vec<Job> = registry
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.created_at < cutoff)
            .cloned()
            .collect();
        for job in &expired {
            registry.jobs.remove(&job.id);
        }
        drop(registry);

        for job in &expired {
            self.delete_job_files(job).await;
        }
        if !expired.is_empty() {
            self.persist().await?;
        }
        Ok(expired.len())
    }

    /// Delete any file under `<static>/uploads` or `<static>/outputs` that
    /// isn't referenced by a live job.
    pub async fn cleanup_orphans(&self) -> Result<usize> {
        let registry = self.registry.read().await;
        let mut referenced: HashSet<PathBuf> = HashSet::new();
        for job in registry.jobs.values() {
            referenced.insert(job.input_file.clone());
            if let Some(output) = &job.output_file {
                referenced.insert(self.static_dir.join("outputs").join(output));
            }
            if let Some(captions) = &job.captions_file {
                referenced.insert(self.static_dir.join("outputs").join(captions));
            }
        }
        drop(registry);

        let mut removed = 0;
        for root in [self.static_dir.join("uploads"), self.static_dir.join("outputs")] {
            let Ok(mut entries) = tokio::fs::read_dir(&root).await else { continue };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.is_dir() || referenced.contains(&path) {
                    continue;
                }
                if tokio::fs::remove_file(&path).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_job_files(&self, job: &Job) {
        let uploads_root = self.static_dir.join("uploads");
        let outputs_root = self.static_dir.join("outputs");

        if ensure_under_root(&job.input_file, &uploads_root).is_ok() {
            let _ = tokio::fs::remove_file(&job.input_file).await;
        }
        if let Some(output) = &job.output_file {
            let path = outputs_root.join(output);
            if ensure_under_root(&path, &outputs_root).is_ok() {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        if let Some(captions) = &job.captions_file {
            let path = outputs_root.join(captions);
            if ensure_under_root(&path, &outputs_root).is_ok() {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobMode, SyncMode};

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

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24).await.unwrap();
        let job = manager
            .create(settings(), PathBuf::from("/uploads/x.mp4"), "x.mp4".into(), InputType::Video)
            .await
            .unwrap();
        let fetched = manager.get(&job.id).await.unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn get_treats_non_uuid_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24).await.unwrap();
        assert!(manager.get("not-a-uuid").await.is_none());
    }

    #[tokio::test]
    async fn cancel_rejects_terminal_job() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24).await.unwrap();
        let job = manager
            .create(settings(), PathBuf::from("/uploads/x.mp4"), "x.mp4".into(), InputType::Video)
            .await
            .unwrap();
        manager.update_status(&job.id, JobStatus::Completed).await.unwrap();
        assert!(manager.cancel(&job.id).await.is_err());
    }

    #[tokio::test]
    async fn cancel_marks_status_and_cancel_set() {
        let dir = tempfile::tempdir().unwrap();
        let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24).await.unwrap();
        let job = manager
            .create(settings(), PathBuf::from("/uploads/x.mp4"), "x.mp4".into(), InputType::Video)
            .await
            .unwrap();
        manager.cancel(&job.id).await.unwrap();
        assert!(manager.is_cancelled(&job.id).await);
        let fetched = manager.get(&job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn restart_recovery_fails_non_terminal_jobs() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24).await.unwrap();
            let job = manager
                .create(settings(), PathBuf::from("/uploads/x.mp4"), "x.mp4".into(), InputType::Video)
                .await
                .unwrap();
            manager.update_status(&job.id, JobStatus::Processing).await.unwrap();
        }
        let manager = JobManager::load(dir.path().to_path_buf(), 100, 1000, 24).await.unwrap();
        let jobs = manager.registry.read().await;
        let job = jobs.jobs.values().next().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("restart"));
    }
}
