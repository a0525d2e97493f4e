use chrono::{DateTime, Utc};

use plotter_core::{
    CommandId, CommandRequest, DeviceStatus, ErrorRecord, Project, ProjectId, UploadTask,
};

#[derive(Debug, Clone)]
pub enum SyncEvent {
    // Poller
    PollingStarted,
    PollingStopped,
    StatusReceived(DeviceStatus),
    StatusFetchFailed {
        sequence: u64,
        at: DateTime<Utc>,
        error: String,
        consecutive_failures: u32,
        degraded: bool,
    },

    // Dispatcher
    CommandDispatched(CommandRequest),
    CommandAcknowledged {
        id: CommandId,
        at: DateTime<Utc>,
        polls_allowed: u32,
    },
    CommandFailed {
        id: CommandId,
        error: String,
        timed_out: bool,
    },
    ConfirmationWindowElapsed {
        id: CommandId,
    },

    // Repository
    /// `uploads` seeds the upload list with the new project's live tasks.
    ActiveProjectChanged {
        project_id: Option<ProjectId>,
        uploads: Vec<UploadTask>,
    },
    /// `revision` is taken when the fetch is issued; older loads lose.
    ProjectLoaded {
        project: Project,
        revision: u64,
    },
    ProjectLoadFailed {
        project_id: ProjectId,
        error: String,
        revision: u64,
    },
    ProjectDeleted(ProjectId),

    // Upload coordinator
    UploadChanged(UploadTask),

    // Errors surfaced to the caller that are also worth showing
    ErrorRaised(ErrorRecord),
}
