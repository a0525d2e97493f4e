use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use plotter_core::{ProjectId, UploadState, UploadTask, UploadTaskId};
use plotter_infra::{PlotterApi, ProgressFn, UploadSource};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_core::SyncEvent;
use crate::error::ClientError;

/// Runs image uploads: FIFO within a project, up to `parallelism` across projects.
///
/// Every state change is pushed to the task's `UploadHandle` and sent to the
/// kernel as `SyncEvent::UploadChanged`, except cancellations, which are
/// returned to the caller to apply.
pub struct UploadCoordinator<A: PlotterApi> {
    inner: Arc<Inner<A>>,
}

struct Inner<A: PlotterApi> {
    api: Arc<A>,
    tx: mpsc::Sender<SyncEvent>,
    permits: Arc<Semaphore>,
    lanes: Mutex<Lanes>,
}

#[derive(Default)]
struct Lanes {
    queues: HashMap<ProjectId, VecDeque<Job>>,
    draining: HashSet<ProjectId>,
    tasks: HashMap<UploadTaskId, TaskEntry>,
    invalidated: VecDeque<ProjectId>,
}

impl Lanes {
    fn is_invalidated(&self, project_id: &str) -> bool {
        self.invalidated.iter().any(|p| p == project_id)
    }

    fn invalidate(&mut self, project_id: &str) {
        self.revalidate(project_id);
        self.invalidated.push_back(project_id.to_string());
        while self.invalidated.len() > plotter_config::INVALIDATED_PROJECT_LIMIT {
            self.invalidated.pop_front();
        }
    }

    fn revalidate(&mut self, project_id: &str) {
        self.invalidated.retain(|p| p != project_id);
    }
}

struct Job {
    task_id: UploadTaskId,
    source: UploadSource,
}

struct TaskEntry {
    task: UploadTask,
    watch: watch::Sender<UploadTask>,
    cancel: CancellationToken,
}

impl<A: PlotterApi> UploadCoordinator<A> {
    pub fn new(api: Arc<A>, tx: mpsc::Sender<SyncEvent>, parallelism: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                tx,
                permits: Arc::new(Semaphore::new(parallelism.max(1))),
                lanes: Mutex::new(Lanes::default()),
            }),
        }
    }

    /// Queue `source` for `project_id`. The returned handle starts in `Queued`.
    pub fn enqueue(
        &self,
        project_id: &str,
        source: UploadSource,
    ) -> Result<UploadHandle, ClientError> {
        if source.is_empty() {
            return Err(ClientError::EmptyUpload {
                file_name: source.file_name,
            });
        }

        let mut lanes = self.inner.lock();
        if lanes.is_invalidated(project_id) {
            return Err(ClientError::ResourceInvalidated {
                project_id: project_id.to_string(),
            });
        }

        let task = UploadTask::queued(
            project_id.to_string(),
            source.file_name.clone(),
            source.len(),
        );
        let (watch, rx) = watch::channel(task.clone());
        let handle = UploadHandle {
            task_id: task.id,
            project_id: task.project_id.clone(),
            rx,
        };
        debug!(task = %task.id, project = %project_id, file = %task.file_name, bytes = task.total_bytes, "upload queued");

        lanes
            .queues
            .entry(task.project_id.clone())
            .or_default()
            .push_back(Job {
                task_id: task.id,
                source,
            });
        lanes.tasks.insert(
            task.id,
            TaskEntry {
                task,
                watch,
                cancel: CancellationToken::new(),
            },
        );

        if lanes.draining.insert(project_id.to_string()) {
            let inner = self.inner.clone();
            let project_id = project_id.to_string();
            crate::async_runtime::spawn(async move {
                inner.drain_lane(project_id).await;
            });
        }
        Ok(handle)
    }

    /// Live (non-terminal) task by id.
    pub fn task(&self, task_id: UploadTaskId) -> Option<UploadTask> {
        self.inner.lock().tasks.get(&task_id).map(|e| e.task.clone())
    }

    /// The task at the head of `project_id`'s lane, then its queue in FIFO order.
    pub fn live_tasks(&self, project_id: &str) -> Vec<UploadTask> {
        let lanes = self.inner.lock();
        let queued: Vec<UploadTaskId> = lanes
            .queues
            .get(project_id)
            .map(|q| q.iter().map(|job| job.task_id).collect())
            .unwrap_or_default();
        let mut live: Vec<UploadTask> = lanes
            .tasks
            .values()
            .filter(|e| e.task.project_id == project_id && !queued.contains(&e.task.id))
            .map(|e| e.task.clone())
            .collect();
        live.extend(
            queued
                .iter()
                .filter_map(|id| lanes.tasks.get(id))
                .map(|e| e.task.clone()),
        );
        live
    }

    pub fn cancel(&self, task_id: UploadTaskId, reason: &str) -> Result<UploadTask, ClientError> {
        self.inner
            .cancel(task_id, reason)
            .ok_or(ClientError::UnknownUploadTask(task_id))
    }

    /// Cancel every queued or running upload for `project_id`.
    pub fn cancel_project(&self, project_id: &str, reason: &str) -> Vec<UploadTask> {
        let ids: Vec<UploadTaskId> = {
            let mut lanes = self.inner.lock();
            lanes.queues.remove(project_id);
            lanes
                .tasks
                .values()
                .filter(|e| e.task.project_id == project_id)
                .map(|e| e.task.id)
                .collect()
        };
        let cancelled: Vec<UploadTask> = ids
            .into_iter()
            .filter_map(|id| self.inner.cancel(id, reason))
            .collect();
        if !cancelled.is_empty() {
            info!(project = %project_id, count = cancelled.len(), "cancelled uploads");
        }
        cancelled
    }

    /// Refuse new uploads for `project_id` and cancel the ones it has. Only the
    /// most recent `INVALIDATED_PROJECT_LIMIT` projects stay refused.
    pub fn invalidate(&self, project_id: &str) -> Vec<UploadTask> {
        self.inner.lock().invalidate(project_id);
        self.cancel_project(project_id, "project deleted")
    }

    /// Undo `invalidate`, e.g. after the delete request failed.
    pub fn revalidate(&self, project_id: &str) {
        self.inner.lock().revalidate(project_id);
    }
}

impl<A: PlotterApi> Inner<A> {
    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drain_lane(self: Arc<Self>, project_id: ProjectId) {
        loop {
            let job = {
                let mut lanes = self.lock();
                match lanes.queues.get_mut(&project_id).and_then(VecDeque::pop_front) {
                    Some(job) => job,
                    None => {
                        lanes.queues.remove(&project_id);
                        lanes.draining.remove(&project_id);
                        return;
                    }
                }
            };
            self.run_job(&project_id, job).await;
        }
    }

    async fn run_job(self: &Arc<Self>, project_id: &str, job: Job) {
        let task_id = job.task_id;
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            return;
        };

        let started = self.update(task_id, |t| {
            if t.state != UploadState::Queued {
                return false;
            }
            t.state = UploadState::InProgress;
            true
        });
        let Some((started, cancel)) = started else {
            debug!(task = %task_id, "upload no longer queued, skipping");
            return;
        };
        self.emit(started).await;

        let progress: ProgressFn = {
            let inner = self.clone();
            Arc::new(move |sent| inner.record_progress(task_id, sent))
        };

        let res = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task = %task_id, "upload aborted");
                return;
            }
            res = self.api.upload_image(project_id, job.source, progress) => res,
        };

        let finished = match res {
            Ok(receipt) => self.update(task_id, |t| {
                if t.state != UploadState::InProgress {
                    return false;
                }
                t.state = UploadState::Succeeded;
                t.bytes_sent = t.total_bytes;
                t.stored_as = receipt.filename.clone();
                true
            }),
            Err(e) => {
                warn!(task = %task_id, project = %project_id, "upload failed: {e}");
                self.update(task_id, |t| {
                    if t.state != UploadState::InProgress {
                        return false;
                    }
                    t.state = UploadState::Failed;
                    t.error = Some(e.to_string());
                    true
                })
            }
        };
        match finished {
            Some((task, _)) => {
                debug!(task = %task_id, state = ?task.state, "upload finished");
                self.emit(task).await;
            }
            None => debug!(task = %task_id, "upload result discarded"),
        }
    }

    /// Progress never reaches `total_bytes` before the server answers.
    fn record_progress(&self, task_id: UploadTaskId, sent: u64) {
        let updated = self.update(task_id, |t| {
            if t.state != UploadState::InProgress {
                return false;
            }
            let capped = sent.min(t.total_bytes.saturating_sub(1));
            if capped <= t.bytes_sent {
                return false;
            }
            t.bytes_sent = capped;
            true
        });
        if let Some((task, _)) = updated {
            if self.tx.try_send(SyncEvent::UploadChanged(task)).is_err() {
                debug!(task = %task_id, "progress event dropped, intake is full");
            }
        }
    }

    fn cancel(&self, task_id: UploadTaskId, reason: &str) -> Option<UploadTask> {
        self.update(task_id, |t| {
            if t.state.is_terminal() {
                return false;
            }
            t.state = UploadState::Cancelled;
            t.error = Some(reason.to_string());
            true
        })
        .map(|(task, _)| task)
    }

    /// Mutate a live task; publish and return the new snapshot when `f` reports a change.
    fn update(
        &self,
        task_id: UploadTaskId,
        f: impl FnOnce(&mut UploadTask) -> bool,
    ) -> Option<(UploadTask, CancellationToken)> {
        let mut lanes = self.lock();
        let entry = lanes.tasks.get_mut(&task_id)?;
        if !f(&mut entry.task) {
            return None;
        }
        let snapshot = entry.task.clone();
        let cancel = entry.cancel.clone();
        entry.watch.send_replace(snapshot.clone());
        if snapshot.state == UploadState::Cancelled {
            cancel.cancel();
        }
        if snapshot.state.is_terminal() {
            lanes.tasks.remove(&task_id);
        }
        Some((snapshot, cancel))
    }

    async fn emit(&self, task: UploadTask) {
        let _ = self.tx.send(SyncEvent::UploadChanged(task)).await;
    }
}

/// Observes one upload task.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    task_id: UploadTaskId,
    project_id: ProjectId,
    rx: watch::Receiver<UploadTask>,
}

impl UploadHandle {
    pub fn task_id(&self) -> UploadTaskId {
        self.task_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn current(&self) -> UploadTask {
        self.rx.borrow().clone()
    }

    /// Next observed change, or `None` once the task can no longer change.
    pub async fn changed(&mut self) -> Option<UploadTask> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait for `Succeeded`, `Failed` or `Cancelled`.
    pub async fn finished(&mut self) -> UploadTask {
        let seen = self
            .rx
            .wait_for(|t| t.state.is_terminal())
            .await
            .map(|r| r.clone())
            .ok();
        seen.unwrap_or_else(|| self.rx.borrow().clone())
    }
}
