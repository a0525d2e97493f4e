use humansize::{format_size, DECIMAL};
use plotter_core::{CommandState, Confirmation, DeviceState, UploadState, UploadTask};

use crate::domain::{Connectivity, ReconciledState, StatusSource};

fn connectivity_label(c: Connectivity) -> String {
    match c {
        Connectivity::NotPolling => "not polling".into(),
        Connectivity::Connecting => "connecting".into(),
        Connectivity::Online => "online".into(),
        Connectivity::Degraded {
            consecutive_failures,
        } => format!("unreachable ({consecutive_failures} failed polls)"),
    }
}

#[derive(Debug, Clone)]
pub struct UploadVm {
    pub file_name: String,
    pub state: UploadState,
    pub fraction: f32,
    pub detail: String,
}

impl From<&UploadTask> for UploadVm {
    fn from(t: &UploadTask) -> Self {
        let detail = match t.state {
            UploadState::Queued => format!("queued, {}", format_size(t.total_bytes, DECIMAL)),
            UploadState::InProgress => format!(
                "{} / {}",
                format_size(t.bytes_sent, DECIMAL),
                format_size(t.total_bytes, DECIMAL)
            ),
            UploadState::Succeeded => match &t.stored_as {
                Some(name) if *name != t.file_name => format!("stored as {name}"),
                _ => "done".into(),
            },
            UploadState::Failed => t.error.clone().unwrap_or_else(|| "failed".into()),
            UploadState::Cancelled => "cancelled".into(),
        };
        Self {
            file_name: t.file_name.clone(),
            state: t.state,
            fraction: t.fraction() as f32,
            detail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceVm {
    pub status_label: String,
    pub progress: Option<(f32, String)>,
    pub connectivity: String,
    pub command_banner: Option<String>,
    pub project_line: Option<String>,
    pub uploads: Vec<UploadVm>,
    pub error: Option<String>,
    pub can_dispatch: bool,
}

pub fn device_vm(state: &ReconciledState) -> DeviceVm {
    let mut status_label = state.status.state.to_string();
    if state.status_source == StatusSource::Projected {
        status_label.push_str(" (expected)");
    }

    let progress = match state.status.state {
        DeviceState::Running | DeviceState::Paused => state
            .status
            .progress
            .map(|p| (p as f32, format!("{}%", state.status.progress_percent().unwrap_or(0)))),
        _ => None,
    };

    let command_banner = state.pending_command.as_ref().map(|c| match (c.state, c.confirmation) {
        (CommandState::Pending, _) => format!("sending {}...", c.kind),
        (_, Some(Confirmation::Awaiting { polls_seen, polls_allowed })) => format!(
            "{} acknowledged, waiting for {} ({polls_seen}/{polls_allowed})",
            c.kind,
            c.kind.expected_state()
        ),
        _ => c.kind.to_string(),
    });

    let project_line = match (&state.active_project_id, &state.active_project) {
        (_, Some(p)) => Some(format!("{} ({} images)", p.name, p.image_refs.len())),
        (Some(id), None) => Some(format!("{id} (loading)")),
        (None, None) => None,
    };

    let error = state.last_error.as_ref().map(|e| {
        if e.is_warning() {
            format!("warning: {}", e.message)
        } else {
            e.message.clone()
        }
    });

    DeviceVm {
        status_label,
        progress,
        connectivity: connectivity_label(state.connectivity),
        command_banner,
        project_line,
        uploads: state.uploads.iter().map(UploadVm::from).collect(),
        error,
        can_dispatch: state.pending_command.as_ref().map_or(true, |c| !c.is_pending()),
    }
}
