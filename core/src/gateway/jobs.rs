//! Background diagnosis jobs.
//!
//! The turn handler enqueues a `DiagnosisJob`; a `WorkerPool` drains the
//! queue in production, while tests use `DeferredQueue` and drain it by hand.

use super::memory::ConversationMemory;
use super::{FAILURE_DIAGNOSIS, FAILURE_ERROR};
use crate::context::DIAGNOSIS_UNAVAILABLE;
use crate::pipeline::{DiagnosisPipeline, PipelineReport};
use crate::session::{IntakeFields, SessionManager, SessionStatus};
use crate::{AgroError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisJob {
    pub session_id: String,
    pub intake: IntakeFields,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: DiagnosisJob) -> Result<()>;
}

/// Takes one job to completion and records the result on the session
pub struct DiagnosisRunner {
    pipeline: Arc<DiagnosisPipeline>,
    sessions: Arc<SessionManager>,
    memory: Arc<ConversationMemory>,
}

impl DiagnosisRunner {
    pub fn new(
        pipeline: Arc<DiagnosisPipeline>,
        sessions: Arc<SessionManager>,
        memory: Arc<ConversationMemory>,
    ) -> Self {
        Self {
            pipeline,
            sessions,
            memory,
        }
    }

    /// `None` when the session ended or left `Processing` before the job started
    pub async fn run(&self, job: DiagnosisJob) -> Option<PipelineReport> {
        let session_id = job.session_id.as_str();
        match self.sessions.get(session_id).await {
            Ok(Some(session)) if session.status == SessionStatus::Processing => {}
            Ok(Some(session)) => {
                warn!(target: "gateway", session = %session_id, status = %session.status, "Session no longer processing; job skipped");
                return None;
            }
            Ok(None) => {
                info!(target: "gateway", session = %session_id, "Session ended before diagnosis started; job skipped");
                return None;
            }
            Err(e) => {
                error!(target: "gateway", session = %session_id, error = %e, "Could not load session; job skipped");
                return None;
            }
        }

        let query = job.intake.query();
        let region = job.intake.region().to_string();

        // Each run starts from a fresh context record
        if let Err(e) = self.pipeline.bus().clear(session_id).await {
            warn!(target: "gateway", session = %session_id, error = %e, "Could not clear previous context record");
        }

        info!(target: "gateway", session = %session_id, region = %region, "Starting diagnosis");
        let report = self.pipeline.run(session_id, &query, &region).await;

        let outcome = report.clone();
        let updated = self
            .sessions
            .update(session_id, move |session| {
                if outcome.is_success() {
                    session.status = SessionStatus::Completed;
                    session.diagnosis = Some(
                        outcome
                            .diagnosis
                            .unwrap_or_else(|| DIAGNOSIS_UNAVAILABLE.to_string()),
                    );
                    session.classification = outcome.classification;
                    session.alert_triggered = outcome.alert_triggered;
                    session.alert_severity = outcome.alert_severity;
                    session.error = None;
                } else {
                    session.status = SessionStatus::Failed;
                    session.error = Some(FAILURE_ERROR.to_string());
                    session.diagnosis = Some(FAILURE_DIAGNOSIS.to_string());
                }
                session.messages.clone()
            })
            .await;

        match updated {
            Ok(Some(log)) => self.memory.refresh(session_id, &log),
            Ok(None) => {
                warn!(target: "gateway", session = %session_id, "Session ended before diagnosis finished; result dropped");
                if let Err(e) = self.pipeline.bus().clear(session_id).await {
                    warn!(target: "gateway", session = %session_id, error = %e, "Could not clear orphaned context record");
                }
            }
            Err(e) => {
                error!(target: "gateway", session = %session_id, error = %e, "Could not store diagnosis result");
            }
        }

        match (&report.failed_stage, &report.error) {
            (Some(stage), Some(err)) => {
                error!(target: "gateway", session = %session_id, stage = %stage, error = %err, "Diagnosis failed");
            }
            _ => info!(target: "gateway", session = %session_id, "Diagnosis completed"),
        }
        Some(report)
    }
}

/// Fixed set of tokio workers over a bounded channel
pub struct WorkerPool {
    sender: RwLock<Option<mpsc::Sender<DiagnosisJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn spawn(runner: Arc<DiagnosisRunner>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<DiagnosisJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let runner = runner.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else {
                            debug!(target: "gateway", worker_id, "Job channel closed; worker exiting");
                            break;
                        };
                        debug!(target: "gateway", worker_id, session = %job.session_id, "Worker picked up job");
                        runner.run(job).await;
                    }
                })
            })
            .collect();

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    /// Stop accepting jobs and wait for queued and in-flight ones to finish
    pub async fn shutdown(&self) {
        drop(self.sender.write().await.take());
        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(target: "gateway", error = %e, "Worker task panicked");
            }
        }
    }
}

#[async_trait]
impl JobQueue for WorkerPool {
    async fn enqueue(&self, job: DiagnosisJob) -> Result<()> {
        let sender = self
            .sender
            .read()
            .await
            .clone()
            .ok_or_else(|| AgroError::Store("diagnosis worker pool is shut down".into()))?;
        sender
            .send(job)
            .await
            .map_err(|_| AgroError::Store("diagnosis worker pool is closed".into()))
    }
}

/// Buffers jobs until drained explicitly
#[derive(Default)]
pub struct DeferredQueue {
    jobs: Mutex<Vec<DiagnosisJob>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn take(&self) -> Vec<DiagnosisJob> {
        std::mem::take(&mut *self.jobs.lock().await)
    }

    /// Run every buffered job in order; skipped jobs yield no report
    pub async fn drain(&self, runner: &DiagnosisRunner) -> Vec<PipelineReport> {
        let mut reports = Vec::new();
        for job in self.take().await {
            reports.extend(runner.run(job).await);
        }
        reports
    }
}

#[async_trait]
impl JobQueue for DeferredQueue {
    async fn enqueue(&self, job: DiagnosisJob) -> Result<()> {
        self.jobs.lock().await.push(job);
        Ok(())
    }
}
