use std::sync::Arc;
use std::time::Duration;

use plotter_core::{
    CommandKind, ErrorRecord, NewProject, Project, ProjectId, UploadState, UploadTaskId,
};
use plotter_infra::{PlotterApi, UploadSource};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::app_core::{SyncEvent, SyncStore};
use crate::dispatcher::{CommandDispatcher, CommandHandle, DispatchSettings};
use crate::domain::{ClientSettings, ReconciledState};
use crate::error::ClientError;
use crate::poller::{PollOutcome, StatusPoller};
use crate::repository::ProjectRepository;
use crate::uploads::{UploadCoordinator, UploadHandle};

const INTAKE_CAPACITY: usize = 256;

/// Owns the reconciled state. Workers report through one channel; the owner
/// drains it with `tick` (synchronous frontends) or `step` (async frontends).
pub struct SyncKernel<A: PlotterApi> {
    store: SyncStore,
    api: Arc<A>,
    settings: ClientSettings,
    poller: StatusPoller<A>,
    dispatcher: CommandDispatcher<A>,
    repository: ProjectRepository<A>,
    uploads: UploadCoordinator<A>,

    tx: mpsc::Sender<SyncEvent>,
    rx: mpsc::Receiver<SyncEvent>,
}

impl<A: PlotterApi> SyncKernel<A> {
    pub fn new(api: A, settings: ClientSettings) -> Self {
        let api = Arc::new(api);
        let (tx, rx) = mpsc::channel(INTAKE_CAPACITY);
        Self {
            store: SyncStore::default(),
            poller: StatusPoller::new(
                api.clone(),
                tx.clone(),
                settings.failure_threshold(),
                settings.status_timeout(),
            ),
            dispatcher: CommandDispatcher::new(
                api.clone(),
                tx.clone(),
                DispatchSettings::from(&settings),
            ),
            repository: ProjectRepository::new(api.clone(), tx.clone()),
            uploads: UploadCoordinator::new(api.clone(), tx.clone(), settings.upload_parallelism()),
            api,
            settings,
            tx,
            rx,
        }
    }

    pub fn state(&self) -> Arc<ReconciledState> {
        self.store.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ReconciledState>> {
        self.store.subscribe()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn sender(&self) -> mpsc::Sender<SyncEvent> {
        self.tx.clone()
    }

    // ---- status ----

    pub fn start_polling(&self) -> bool {
        self.start_polling_every(self.settings.poll_interval())
    }

    pub fn start_polling_every(&self, interval: Duration) -> bool {
        let started = self.poller.start(interval);
        if started {
            self.apply(SyncEvent::PollingStarted);
        }
        started
    }

    pub fn stop_polling(&self) -> bool {
        let stopped = self.poller.stop();
        if stopped {
            self.apply(SyncEvent::PollingStopped);
        }
        stopped
    }

    /// Fetch once now and fold the result in before returning.
    pub async fn poll_now(&mut self) -> Option<PollOutcome> {
        let outcome = self.poller.poll_once().await;
        self.tick();
        outcome
    }

    pub fn poller(&self) -> &StatusPoller<A> {
        &self.poller
    }

    // ---- commands ----

    /// Send `kind` unless another command is still waiting for its answer.
    pub fn dispatch(&self, kind: CommandKind) -> Result<CommandHandle, ClientError> {
        let req = match self.dispatcher.reserve(kind) {
            Ok(req) => req,
            Err(e) => {
                self.apply(SyncEvent::ErrorRaised(ErrorRecord::new(e.kind(), e.to_string())));
                return Err(e);
            }
        };
        info!(id = %req.id, %kind, "dispatching command");
        self.apply(SyncEvent::CommandDispatched(req.clone()));
        let handle = self.dispatcher.launch(req);
        self.dispatcher.publish_from(&self.state());
        Ok(handle)
    }

    // ---- projects ----

    pub async fn list_projects(&self) -> Result<Vec<Project>, ClientError> {
        self.repository.list().await
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Project, ClientError> {
        let revision = self.repository.next_revision();
        let project = self.repository.get(project_id).await?;
        self.apply(SyncEvent::ProjectLoaded {
            project: project.clone(),
            revision,
        });
        Ok(project)
    }

    pub async fn create_project(&self, project: &NewProject) -> Result<Project, ClientError> {
        let revision = self.repository.next_revision();
        let created = self.repository.create(project).await?;
        self.apply(SyncEvent::ProjectLoaded {
            project: created.clone(),
            revision,
        });
        Ok(created)
    }

    /// Uploads for the project are cancelled before the request goes out. If the
    /// device refuses the delete the project accepts uploads again.
    pub async fn delete_project(&self, project_id: &str) -> Result<(), ClientError> {
        for task in self.uploads.invalidate(project_id) {
            self.apply(SyncEvent::UploadChanged(task));
        }
        match self.repository.delete(project_id).await {
            Ok(()) => {
                self.apply(SyncEvent::ProjectDeleted(project_id.to_string()));
                Ok(())
            }
            Err(e) => {
                self.uploads.revalidate(project_id);
                self.apply(SyncEvent::ErrorRaised(ErrorRecord::new(
                    e.kind(),
                    format!("could not delete project {project_id}: {e}"),
                )));
                Err(e)
            }
        }
    }

    /// Switch the active project. Uploads still running for the previous one are
    /// cancelled; the new project's live uploads become the visible list.
    pub fn select_project(&self, project_id: Option<ProjectId>) {
        let previous = self.state().active_project_id.clone();
        if previous == project_id {
            return;
        }
        if let Some(prev) = previous {
            for task in self.uploads.cancel_project(&prev, "active project changed") {
                self.apply(SyncEvent::UploadChanged(task));
            }
        }
        debug!(project = ?project_id, "active project changed");
        let uploads = project_id
            .as_deref()
            .map(|id| self.uploads.live_tasks(id))
            .unwrap_or_default();
        self.apply(SyncEvent::ActiveProjectChanged {
            project_id: project_id.clone(),
            uploads,
        });
        if let Some(id) = project_id {
            self.repository.refresh_in_background(id);
        }
    }

    pub fn refresh_active_project(&self) {
        if let Some(id) = self.state().active_project_id.clone() {
            self.repository.refresh_in_background(id);
        }
    }

    pub fn thumbnail_url(&self, project_id: &str) -> Result<reqwest::Url, ClientError> {
        self.repository.thumbnail_url(project_id)
    }

    pub fn image_url(&self, project_id: &str, filename: &str) -> Result<reqwest::Url, ClientError> {
        self.repository.image_url(project_id, filename)
    }

    // ---- uploads ----

    pub fn enqueue_upload(
        &self,
        project_id: &str,
        source: UploadSource,
    ) -> Result<UploadHandle, ClientError> {
        match self.uploads.enqueue(project_id, source) {
            Ok(handle) => {
                self.apply(SyncEvent::UploadChanged(handle.current()));
                Ok(handle)
            }
            Err(e) => {
                self.apply(SyncEvent::ErrorRaised(ErrorRecord::new(e.kind(), e.to_string())));
                Err(e)
            }
        }
    }

    /// Read `path` and queue it like `enqueue_upload`.
    pub async fn enqueue_upload_file(
        &self,
        project_id: &str,
        path: impl AsRef<std::path::Path>,
    ) -> Result<UploadHandle, ClientError> {
        let source = match UploadSource::from_path(path).await {
            Ok(source) => source,
            Err(e) => {
                let e = ClientError::from(e);
                self.apply(SyncEvent::ErrorRaised(ErrorRecord::new(e.kind(), e.to_string())));
                return Err(e);
            }
        };
        self.enqueue_upload(project_id, source)
    }

    pub fn cancel_upload(&self, task_id: UploadTaskId) -> Result<(), ClientError> {
        let task = self.uploads.cancel(task_id, "cancelled by user")?;
        self.apply(SyncEvent::UploadChanged(task));
        Ok(())
    }

    // ---- intake ----

    /// Apply everything already queued without waiting. Returns how many events were applied.
    pub fn tick(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(ev) = self.rx.try_recv() {
            self.intake(ev);
            applied += 1;
        }
        applied
    }

    /// Wait for the next worker event and apply it.
    pub async fn step(&mut self) -> bool {
        match self.rx.recv().await {
            Some(ev) => {
                self.intake(ev);
                true
            }
            None => false,
        }
    }

    /// Keep applying events until `done` holds for the reconciled state.
    pub async fn run_until(
        &mut self,
        mut done: impl FnMut(&ReconciledState) -> bool,
    ) -> Arc<ReconciledState> {
        loop {
            let state = self.state();
            if done(&state) || !self.step().await {
                return state;
            }
        }
    }

    fn intake(&self, ev: SyncEvent) {
        let refresh = match &ev {
            SyncEvent::UploadChanged(task) if task.state == UploadState::Succeeded => {
                Some(task.project_id.clone())
            }
            _ => None,
        };
        let state = self.apply(ev);
        if let Some(project_id) = refresh {
            if state.active_project_id.as_ref() == Some(&project_id) {
                self.repository.refresh_in_background(project_id);
            }
        }
    }

    fn apply(&self, ev: SyncEvent) -> Arc<ReconciledState> {
        let state = self.store.apply(ev);
        self.dispatcher.publish_from(&state);
        state
    }
}
