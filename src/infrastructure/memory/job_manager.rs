//! In-Memory Job Manager Implementation

use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::application::ports::{GenerationJob, JobError, JobManagerPort, JobState};

/// 内存任务管理器
pub struct InMemoryJobManager {
    /// job_id -> GenerationJob
    jobs: DashMap<String, GenerationJob>,
    /// 执行队列发送端
    queue_sender: mpsc::Sender<String>,
}

impl InMemoryJobManager {
    pub fn new(queue_sender: mpsc::Sender<String>) -> Self {
        Self {
            jobs: DashMap::new(),
            queue_sender,
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 在单个 entry 锁内完成校验与修改
    fn transition(
        &self,
        job_id: &str,
        next: JobState,
        update: impl FnOnce(&mut GenerationJob),
    ) -> Result<(), JobError> {
        let mut job = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        let old_state = job.state;
        if !old_state.can_transition(next) {
            return Err(JobError::InvalidStateTransition {
                from: old_state,
                to: next,
            });
        }

        job.state = next;
        if next.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        update(&mut job);

        tracing::debug!(
            job_id = %job_id,
            old_state = %old_state,
            new_state = %next,
            "Job state changed"
        );
        Ok(())
    }
}

impl JobManagerPort for InMemoryJobManager {
    fn submit(&self, job: GenerationJob) -> Result<String, JobError> {
        let job_id = job.job_id.clone();
        if self.jobs.contains_key(&job_id) {
            return Err(JobError::AlreadyExists(job_id));
        }

        self.jobs.insert(job_id.clone(), job);

        // 队列满或已关闭时撤回登记
        if let Err(e) = self.queue_sender.try_send(job_id.clone()) {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to enqueue job");
            self.jobs.remove(&job_id);
            return Err(JobError::QueueUnavailable);
        }

        tracing::debug!(job_id = %job_id, "Job submitted");
        Ok(job_id)
    }

    fn get(&self, job_id: &str) -> Option<GenerationJob> {
        self.jobs.get(job_id).map(|j| j.clone())
    }

    fn get_state(&self, job_id: &str) -> Option<JobState> {
        self.jobs.get(job_id).map(|j| j.state)
    }

    fn set_state(&self, job_id: &str, state: JobState) -> Result<(), JobError> {
        self.transition(job_id, state, |_| {})
    }

    fn set_succeeded(&self, job_id: &str, output_path: PathBuf) -> Result<(), JobError> {
        self.transition(job_id, JobState::Succeeded, |job| {
            job.output_path = Some(output_path);
        })
    }

    fn set_failed(&self, job_id: &str, error: String) -> Result<(), JobError> {
        self.transition(job_id, JobState::Failed, |job| {
            job.error_message = Some(error);
        })
    }

    fn purge_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let cutoff = Utc::now() - age;

        let before = self.jobs.len();
        self.jobs.retain(|_, job| match (job.state.is_terminal(), job.completed_at) {
            (true, Some(done)) => done > cutoff,
            _ => true,
        });
        let purged = before.saturating_sub(self.jobs.len());

        if purged > 0 {
            tracing::debug!(purged, remaining = self.jobs.len(), "Finished jobs purged");
        }
        purged
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::selector::BackendSelection;
    use crate::domain::generation::{GenerationDraft, GenerationRequest, NimModel, RequestKind};

    fn job() -> GenerationJob {
        let request = GenerationRequest::validate(
            RequestKind::TextToImage,
            GenerationDraft::new("a lighthouse at dusk"),
        )
        .unwrap();
        GenerationJob::new(request, BackendSelection::Nim(NimModel::FluxDev))
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let (tx, mut rx) = mpsc::channel(8);
        let manager = InMemoryJobManager::new(tx);

        let job = job();
        let job_id = manager.submit(job).unwrap();
        assert_eq!(rx.try_recv().unwrap(), job_id);
        assert_eq!(manager.get_state(&job_id), Some(JobState::Submitted));

        manager.set_state(&job_id, JobState::Running).unwrap();
        manager
            .set_succeeded(&job_id, PathBuf::from("output/flux_image.png"))
            .unwrap();

        let job = manager.get(&job_id).unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert!(job.completed_at.is_some());
        assert_eq!(job.output_path, Some(PathBuf::from("output/flux_image.png")));
    }

    #[tokio::test]
    async fn test_rejects_backward_transition() {
        let (tx, _rx) = mpsc::channel(8);
        let manager = InMemoryJobManager::new(tx);
        let job_id = manager.submit(job()).unwrap();

        manager.set_failed(&job_id, "boom".into()).unwrap();
        let err = manager.set_state(&job_id, JobState::Running).unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidStateTransition {
                from: JobState::Failed,
                to: JobState::Running
            }
        ));
        assert_eq!(manager.get(&job_id).unwrap().error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_cannot_succeed_without_running() {
        let (tx, _rx) = mpsc::channel(8);
        let manager = InMemoryJobManager::new(tx);
        let job_id = manager.submit(job()).unwrap();

        assert!(manager.set_succeeded(&job_id, PathBuf::from("x.png")).is_err());
        assert_eq!(manager.get_state(&job_id), Some(JobState::Submitted));
    }

    #[tokio::test]
    async fn test_full_queue_is_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let manager = InMemoryJobManager::new(tx);

        manager.submit(job()).unwrap();
        let err = manager.submit(job()).unwrap_err();
        assert!(matches!(err, JobError::QueueUnavailable));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (tx, _rx) = mpsc::channel(8);
        let manager = InMemoryJobManager::new(tx);
        assert!(matches!(
            manager.set_state("missing", JobState::Running),
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_finished_keeps_active_jobs() {
        let (tx, _rx) = mpsc::channel(8);
        let manager = InMemoryJobManager::new(tx);

        let done = manager.submit(job()).unwrap();
        let active = manager.submit(job()).unwrap();
        manager.set_failed(&done, "boom".into()).unwrap();
        manager.set_state(&active, JobState::Running).unwrap();

        // 刚完成的任务未超过保留期
        assert_eq!(manager.purge_finished(Duration::from_secs(3600)), 0);

        assert_eq!(manager.purge_finished(Duration::ZERO), 1);
        assert!(manager.get(&done).is_none());
        assert!(manager.get(&active).is_some());
    }
}
