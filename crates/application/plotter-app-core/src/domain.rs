use std::time::Duration;

use serde::{Deserialize, Serialize};

use plotter_core::{
    CommandId, CommandRequest, DeviceStatus, ErrorRecord, Project, ProjectId, UploadTask,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub failure_threshold: u32,
    pub confirmation_polls: u32,
    pub confirmation_window_ms: u64,
    pub command_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub upload_parallelism: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: plotter_config::DEFAULT_BASE_URL.to_string(),
            poll_interval_ms: plotter_config::DEFAULT_POLL_INTERVAL_MS,
            failure_threshold: plotter_config::DEFAULT_FAILURE_THRESHOLD,
            confirmation_polls: plotter_config::DEFAULT_CONFIRMATION_POLLS,
            confirmation_window_ms: plotter_config::DEFAULT_CONFIRMATION_WINDOW_MS,
            command_timeout_ms: plotter_config::DEFAULT_COMMAND_TIMEOUT_MS,
            status_timeout_ms: plotter_config::DEFAULT_STATUS_TIMEOUT_MS,
            upload_parallelism: plotter_config::DEFAULT_UPLOAD_PARALLELISM,
        }
    }
}

impl ClientSettings {
    pub fn from_env() -> Self {
        Self {
            base_url: plotter_config::base_url_from_env(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        plotter_config::clamp_poll_interval(self.poll_interval_ms)
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold.max(1)
    }

    pub fn confirmation_polls(&self) -> u32 {
        self.confirmation_polls.max(1)
    }

    pub fn confirmation_window(&self) -> Duration {
        Duration::from_millis(self.confirmation_window_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn upload_parallelism(&self) -> usize {
        plotter_config::clamp_upload_parallelism(self.upload_parallelism)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    NotPolling,
    Connecting,
    Online,
    Degraded {
        consecutive_failures: u32,
    },
}

/// Where the displayed `status` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusSource {
    #[default]
    Polled,
    /// An acknowledged command is awaiting confirmation; `status.state` is the
    /// state the command should produce.
    Projected,
}

/// The single reconciled view handed to observers. Replaced wholesale per event.
#[derive(Debug, Clone, Default)]
pub struct ReconciledState {
    pub status: DeviceStatus,
    pub status_source: StatusSource,
    pub polled_status: Option<DeviceStatus>,
    pub connectivity: Connectivity,
    pub last_sequence: u64,

    pub active_project_id: Option<ProjectId>,
    pub active_project: Option<Project>,
    /// Revision of the fetch that produced `active_project`; 0 until one lands.
    pub project_revision: u64,
    pub uploads: Vec<UploadTask>,

    pub pending_command: Option<CommandRequest>,
    pub command_history: Vec<CommandRequest>,

    pub last_error: Option<ErrorRecord>,
}

impl ReconciledState {
    /// Look a command up in the pending slot first, then in history (newest first).
    pub fn command(&self, id: CommandId) -> Option<&CommandRequest> {
        self.pending_command
            .iter()
            .chain(self.command_history.iter().rev())
            .find(|c| c.id == id)
    }

    pub fn upload(&self, id: plotter_core::UploadTaskId) -> Option<&UploadTask> {
        self.uploads.iter().find(|t| t.id == id)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.connectivity, Connectivity::Degraded { .. })
    }
}
