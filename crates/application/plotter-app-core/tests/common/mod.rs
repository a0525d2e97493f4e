#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use plotter_app_core::{ClientSettings, PlotterApi, SyncKernel, UploadSource};
use plotter_core::{
    CommandKind, DeviceState, NewProject, Project, StatusPayload, UploadReceipt,
};
use plotter_infra::{CommandAck, ProgressFn, TransportError};
use tokio::sync::Semaphore;

/// In-memory device whose answers are scripted by each test.
pub struct FakeDevice {
    base: reqwest::Url,

    statuses: Mutex<VecDeque<Result<DeviceState, TransportError>>>,
    steady_state: Mutex<DeviceState>,

    pub commands: Mutex<Vec<CommandKind>>,
    pub command_calls: AtomicUsize,
    pub hold_commands: AtomicBool,
    pub fail_commands: AtomicBool,
    command_release: Semaphore,

    projects: Mutex<HashMap<String, Project>>,
    project_delays: Mutex<VecDeque<Duration>>,
    pub project_fetches: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,

    pub hold_uploads: AtomicBool,
    upload_release: Semaphore,
    pub upload_starts: Mutex<Vec<String>>,
    pub uploads_finished: AtomicUsize,
    active_uploads: Mutex<HashMap<String, usize>>,
    pub max_overlap_per_project: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            base: reqwest::Url::parse("http://plotter.test/").unwrap(),
            statuses: Mutex::new(VecDeque::new()),
            steady_state: Mutex::new(DeviceState::Idle),
            commands: Mutex::new(Vec::new()),
            command_calls: AtomicUsize::new(0),
            hold_commands: AtomicBool::new(false),
            fail_commands: AtomicBool::new(false),
            command_release: Semaphore::new(0),
            projects: Mutex::new(HashMap::new()),
            project_delays: Mutex::new(VecDeque::new()),
            project_fetches: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            hold_uploads: AtomicBool::new(false),
            upload_release: Semaphore::new(0),
            upload_starts: Mutex::new(Vec::new()),
            uploads_finished: AtomicUsize::new(0),
            active_uploads: Mutex::new(HashMap::new()),
            max_overlap_per_project: AtomicUsize::new(0),
        }
    }

    pub fn with_project(self, id: &str, name: &str) -> Self {
        self.projects.lock().unwrap().insert(id.to_string(), project(id, name));
        self
    }

    /// Answer used once the scripted statuses run out.
    pub fn set_steady_state(&self, state: DeviceState) {
        *self.steady_state.lock().unwrap() = state;
    }

    pub fn script_status(&self, state: DeviceState) {
        self.statuses.lock().unwrap().push_back(Ok(state));
    }

    pub fn script_status_failure(&self) {
        self.statuses.lock().unwrap().push_back(Err(TransportError::Network {
            url: "http://plotter.test/status".into(),
            message: "connection refused".into(),
        }));
    }

    /// The next `get_project` reads its answer immediately but returns after `delay`.
    pub fn delay_next_project_fetch(&self, delay: Duration) {
        self.project_delays.lock().unwrap().push_back(delay);
    }

    pub fn add_image(&self, project_id: &str, filename: &str) {
        if let Some(p) = self.projects.lock().unwrap().get_mut(project_id) {
            p.image_refs.push(filename.to_string());
        }
    }

    pub fn release_commands(&self, n: usize) {
        self.command_release.add_permits(n);
    }

    pub fn release_uploads(&self, n: usize) {
        self.upload_release.add_permits(n);
    }
}

pub fn project(id: &str, name: &str) -> Project {
    Project {
        id: id.to_string(),
        name: name.to_string(),
        parameters: Default::default(),
        image_refs: vec![],
        created_at: None,
    }
}

fn http_error(path: &str, status: u16) -> TransportError {
    TransportError::Http {
        url: format!("http://plotter.test/{path}"),
        status,
        body: String::new(),
    }
}

#[async_trait::async_trait]
impl PlotterApi for FakeDevice {
    async fn fetch_status(&self) -> Result<StatusPayload, TransportError> {
        let next = self.statuses.lock().unwrap().pop_front();
        let state = match next {
            Some(res) => res?,
            None => *self.steady_state.lock().unwrap(),
        };
        Ok(StatusPayload {
            state,
            progress: None,
        })
    }

    async fn send_command(&self, kind: CommandKind) -> Result<CommandAck, TransportError> {
        self.command_calls.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().push(kind);
        if self.hold_commands.load(Ordering::SeqCst) {
            self.command_release.acquire().await.unwrap().forget();
        }
        if self.fail_commands.load(Ordering::SeqCst) {
            return Err(http_error("command", 500));
        }
        Ok(CommandAck {
            status: Some("ok".into()),
            message: None,
        })
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TransportError> {
        let mut all: Vec<Project> = self.projects.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn get_project(&self, project_id: &str) -> Result<Project, TransportError> {
        let found = self.projects.lock().unwrap().get(project_id).cloned();
        self.project_fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.project_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        found.ok_or_else(|| http_error("projects", 404))
    }

    async fn create_project(&self, new: &NewProject) -> Result<Project, TransportError> {
        let id = format!("proj-{}", self.projects.lock().unwrap().len() + 1);
        let mut created = project(&id, &new.name);
        created.parameters = new.parameters.clone();
        self.projects.lock().unwrap().insert(id, created.clone());
        Ok(created)
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), TransportError> {
        if project_id == "locked" {
            return Err(http_error("projects/locked", 409));
        }
        self.projects.lock().unwrap().remove(project_id);
        self.deleted.lock().unwrap().push(project_id.to_string());
        Ok(())
    }

    async fn upload_image(
        &self,
        project_id: &str,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, TransportError> {
        self.upload_starts.lock().unwrap().push(source.file_name.clone());
        {
            let mut active = self.active_uploads.lock().unwrap();
            let n = active.entry(project_id.to_string()).or_default();
            *n += 1;
            self.max_overlap_per_project.fetch_max(*n, Ordering::SeqCst);
        }

        let total = source.len();
        for step in 1..=4u64 {
            progress(total * step / 4);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self.hold_uploads.load(Ordering::SeqCst) {
            self.upload_release.acquire().await.unwrap().forget();
        }

        *self
            .active_uploads
            .lock()
            .unwrap()
            .get_mut(project_id)
            .unwrap() -= 1;
        self.uploads_finished.fetch_add(1, Ordering::SeqCst);
        Ok(UploadReceipt {
            filename: Some(source.file_name),
        })
    }

    fn base_url(&self) -> &reqwest::Url {
        &self.base
    }
}

pub fn quick_settings() -> ClientSettings {
    ClientSettings {
        base_url: "http://plotter.test/".into(),
        poll_interval_ms: 250,
        failure_threshold: 3,
        confirmation_polls: 5,
        confirmation_window_ms: 5_000,
        command_timeout_ms: 2_000,
        status_timeout_ms: 1_000,
        upload_parallelism: 2,
    }
}

pub fn kernel_with(device: FakeDevice, settings: ClientSettings) -> SyncKernel<FakeDevice> {
    SyncKernel::new(device, settings)
}

pub fn image(name: &str, len: usize) -> UploadSource {
    UploadSource::new(name, vec![0xAB; len])
}

pub const WAIT: Duration = Duration::from_secs(3);
