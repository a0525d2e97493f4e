use plotter_core::{
    CommandId, CommandRequest, CommandState, Confirmation, DeviceStatus, ErrorKind, ErrorRecord,
    UploadState, UploadTask,
};
use tracing::{debug, info, warn};

use crate::dispatcher::{observe_poll, PollVerdict};
use crate::domain::{Connectivity, ReconciledState, StatusSource};

use super::events::SyncEvent;

pub fn reduce(mut state: ReconciledState, ev: SyncEvent) -> ReconciledState {
    match ev {
        SyncEvent::PollingStarted => {
            if state.connectivity == Connectivity::NotPolling {
                state.connectivity = Connectivity::Connecting;
            }
        }
        SyncEvent::PollingStopped => state.connectivity = Connectivity::NotPolling,

        SyncEvent::StatusReceived(status) => accept_status(&mut state, status),

        SyncEvent::StatusFetchFailed {
            sequence,
            at,
            error,
            consecutive_failures,
            degraded,
        } => {
            if sequence <= state.last_sequence {
                debug!(sequence, last = state.last_sequence, "dropping stale poll failure");
                return state;
            }
            state.last_sequence = sequence;
            state.last_error = Some(ErrorRecord::new(ErrorKind::Transport, error));
            if degraded {
                let unknown = DeviceStatus::unknown(sequence, at);
                state.connectivity = Connectivity::Degraded {
                    consecutive_failures,
                };
                state.polled_status = Some(unknown.clone());
                state.status = unknown;
                state.status_source = StatusSource::Polled;
            }
        }

        SyncEvent::CommandDispatched(req) => {
            if let Some(mut prev) = state.pending_command.take() {
                if prev.is_awaiting_confirmation() {
                    debug!(id = %prev.id, "superseded before confirmation");
                    prev.confirmation = Some(Confirmation::Superseded);
                }
                archive(&mut state, prev);
                show_polled(&mut state);
            }
            state.pending_command = Some(req);
        }

        SyncEvent::CommandAcknowledged {
            id,
            at,
            polls_allowed,
        } => {
            if let Some(cmd) = pending_mut(&mut state, id) {
                cmd.state = CommandState::Acknowledged;
                cmd.acknowledged_at = Some(at);
                cmd.confirmation = Some(Confirmation::Awaiting {
                    polls_seen: 0,
                    polls_allowed,
                });
                show_projected(&mut state);
            } else if let Some(cmd) = history_mut(&mut state, id) {
                if cmd.state == CommandState::Pending {
                    cmd.state = CommandState::Acknowledged;
                    cmd.acknowledged_at = Some(at);
                    cmd.confirmation = Some(Confirmation::Superseded);
                }
            }
        }

        SyncEvent::CommandFailed {
            id,
            error,
            timed_out,
        } => {
            let outcome = if timed_out {
                CommandState::TimedOut
            } else {
                CommandState::Failed
            };
            if let Some(cmd) = pending_mut(&mut state, id) {
                cmd.state = outcome;
                cmd.error = Some(error.clone());
                let kind = cmd.kind;
                if let Some(done) = state.pending_command.take() {
                    archive(&mut state, done);
                }
                show_polled(&mut state);
                state.last_error = Some(ErrorRecord::new(
                    ErrorKind::Transport,
                    format!("{kind} was not accepted: {error}"),
                ));
            } else if let Some(cmd) = history_mut(&mut state, id) {
                if cmd.state == CommandState::Pending {
                    cmd.state = outcome;
                    cmd.error = Some(error);
                }
            }
        }

        SyncEvent::ConfirmationWindowElapsed { id } => {
            let awaiting = state
                .pending_command
                .as_ref()
                .is_some_and(|c| c.id == id && c.is_awaiting_confirmation());
            if awaiting {
                unconfirm(&mut state);
            }
        }

        SyncEvent::ActiveProjectChanged {
            project_id,
            mut uploads,
        } => {
            if state.active_project_id != project_id {
                uploads.retain(|t| Some(&t.project_id) == project_id.as_ref());
                state.active_project_id = project_id;
                state.active_project = None;
                state.project_revision = 0;
                state.uploads = uploads;
            }
        }

        SyncEvent::ProjectLoaded { project, revision } => {
            if state.active_project_id.as_deref() != Some(project.id.as_str()) {
                debug!(project = %project.id, "ignoring project that is no longer active");
            } else if revision <= state.project_revision {
                debug!(
                    project = %project.id,
                    revision,
                    last = state.project_revision,
                    "dropping stale project load"
                );
            } else {
                state.project_revision = revision;
                state.active_project = Some(project);
            }
        }

        SyncEvent::ProjectLoadFailed {
            project_id,
            error,
            revision,
        } => {
            if state.active_project_id.as_deref() == Some(project_id.as_str())
                && revision > state.project_revision
            {
                state.last_error = Some(ErrorRecord::new(
                    ErrorKind::Transport,
                    format!("could not load project {project_id}: {error}"),
                ));
            }
        }

        SyncEvent::ProjectDeleted(project_id) => {
            if state.active_project_id.as_deref() == Some(project_id.as_str()) {
                state.active_project_id = None;
                state.active_project = None;
                state.uploads.clear();
            }
        }

        SyncEvent::UploadChanged(task) => apply_upload(&mut state, task),

        SyncEvent::ErrorRaised(record) => state.last_error = Some(record),
    }
    state
}

fn accept_status(state: &mut ReconciledState, status: DeviceStatus) {
    if status.sequence <= state.last_sequence {
        debug!(
            sequence = status.sequence,
            last = state.last_sequence,
            "dropping stale status"
        );
        return;
    }
    state.last_sequence = status.sequence;
    if state.is_degraded() {
        info!("device reachable again");
    }
    state.connectivity = Connectivity::Online;
    state.polled_status = Some(status.clone());

    let verdict = state
        .pending_command
        .as_ref()
        .and_then(|cmd| observe_poll(cmd, &status));

    match verdict {
        None => show_polled(state),
        Some(PollVerdict::Confirmed) => {
            if let Some(mut cmd) = state.pending_command.take() {
                info!(id = %cmd.id, kind = %cmd.kind, "command confirmed by status poll");
                cmd.confirmation = Some(Confirmation::Confirmed);
                archive(state, cmd);
            }
            show_polled(state);
        }
        Some(PollVerdict::Waiting {
            polls_seen,
            polls_allowed,
        }) => {
            if let Some(cmd) = state.pending_command.as_mut() {
                cmd.confirmation = Some(Confirmation::Awaiting {
                    polls_seen,
                    polls_allowed,
                });
            }
            show_projected(state);
        }
        Some(PollVerdict::Exhausted) => unconfirm(state),
    }
}

fn unconfirm(state: &mut ReconciledState) {
    let Some(mut cmd) = state.pending_command.take() else {
        return;
    };
    cmd.confirmation = Some(Confirmation::Unconfirmed);
    let expected = cmd.kind.expected_state();
    warn!(id = %cmd.id, kind = %cmd.kind, %expected, "command unconfirmed");
    state.last_error = Some(ErrorRecord::new(
        ErrorKind::Unconfirmed,
        format!(
            "{} was acknowledged but the device never reported {expected}",
            cmd.kind
        ),
    ));
    archive(state, cmd);
    show_polled(state);
}

fn show_polled(state: &mut ReconciledState) {
    if let Some(polled) = &state.polled_status {
        state.status = polled.clone();
    }
    state.status_source = StatusSource::Polled;
}

fn show_projected(state: &mut ReconciledState) {
    let Some(expected) = state
        .pending_command
        .as_ref()
        .map(|c| c.kind.expected_state())
    else {
        return;
    };
    let base = state
        .polled_status
        .clone()
        .unwrap_or_else(|| state.status.clone());
    state.status = base.with_state(expected);
    state.status_source = StatusSource::Projected;
}

fn archive(state: &mut ReconciledState, cmd: CommandRequest) {
    state.command_history.push(cmd);
    let excess = state
        .command_history
        .len()
        .saturating_sub(plotter_config::COMMAND_HISTORY_LIMIT);
    if excess > 0 {
        state.command_history.drain(..excess);
    }
}

fn pending_mut(state: &mut ReconciledState, id: CommandId) -> Option<&mut CommandRequest> {
    state.pending_command.as_mut().filter(|c| c.id == id)
}

fn history_mut(state: &mut ReconciledState, id: CommandId) -> Option<&mut CommandRequest> {
    state.command_history.iter_mut().rev().find(|c| c.id == id)
}

fn apply_upload(state: &mut ReconciledState, task: UploadTask) {
    if state.active_project_id.as_deref() != Some(task.project_id.as_str()) {
        debug!(task = %task.id, project = %task.project_id, "upload event for inactive project");
        return;
    }
    if task.state == UploadState::Failed {
        state.last_error = Some(ErrorRecord::new(
            ErrorKind::Upload,
            format!(
                "upload of {} failed: {}",
                task.file_name,
                task.error.as_deref().unwrap_or("unknown error")
            ),
        ));
    }
    match state.uploads.iter_mut().find(|t| t.id == task.id) {
        Some(existing) if existing.state.is_terminal() => {
            debug!(task = %task.id, "upload already finished, ignoring update");
        }
        Some(existing)
            if existing.state == UploadState::InProgress && task.state == UploadState::Queued =>
        {
            debug!(task = %task.id, "upload already started, ignoring queued snapshot");
        }
        Some(existing) => {
            let sent = existing.bytes_sent.max(task.bytes_sent);
            *existing = task;
            existing.bytes_sent = sent;
        }
        // A running task the state has never seen was dropped by a project switch.
        None if task.state == UploadState::InProgress => {
            debug!(task = %task.id, "upload unknown to the active project, ignoring");
        }
        None => state.uploads.push(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use plotter_core::{CommandKind, DeviceState, Project};

    fn status(seq: u64, state: DeviceState) -> DeviceStatus {
        DeviceStatus {
            state,
            progress: None,
            observed_at: Utc::now(),
            sequence: seq,
        }
    }

    fn acked(state: ReconciledState, kind: CommandKind, polls: u32) -> (ReconciledState, CommandId) {
        let req = CommandRequest::new(kind);
        let id = req.id;
        let state = reduce(state, SyncEvent::CommandDispatched(req));
        let state = reduce(
            state,
            SyncEvent::CommandAcknowledged {
                id,
                at: Utc::now(),
                polls_allowed: polls,
            },
        );
        (state, id)
    }

    #[test]
    fn newest_sequence_wins_regardless_of_arrival_order() {
        let observations = [
            status(1, DeviceState::Idle),
            status(2, DeviceState::Running),
            status(3, DeviceState::Paused),
        ];
        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let mut state = ReconciledState::default();
            for ix in order {
                state = reduce(state, SyncEvent::StatusReceived(observations[ix].clone()));
            }
            assert_eq!(state.status.state, DeviceState::Paused, "order {order:?}");
            assert_eq!(state.last_sequence, 3);
        }
    }

    #[test]
    fn failures_below_threshold_keep_last_known_status() {
        let state = reduce(
            ReconciledState::default(),
            SyncEvent::StatusReceived(status(1, DeviceState::Running)),
        );
        let state = reduce(
            state,
            SyncEvent::StatusFetchFailed {
                sequence: 2,
                at: Utc::now(),
                error: "connection refused".into(),
                consecutive_failures: 1,
                degraded: false,
            },
        );
        assert_eq!(state.status.state, DeviceState::Running);
        assert_eq!(state.connectivity, Connectivity::Online);
        assert_eq!(state.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::Transport));

        let state = reduce(
            state,
            SyncEvent::StatusFetchFailed {
                sequence: 3,
                at: Utc::now(),
                error: "connection refused".into(),
                consecutive_failures: 3,
                degraded: true,
            },
        );
        assert_eq!(state.status.state, DeviceState::Unknown);
        assert_eq!(
            state.connectivity,
            Connectivity::Degraded {
                consecutive_failures: 3
            }
        );

        let state = reduce(state, SyncEvent::StatusReceived(status(4, DeviceState::Idle)));
        assert_eq!(state.connectivity, Connectivity::Online);
        assert_eq!(state.status.state, DeviceState::Idle);
    }

    #[test]
    fn acknowledged_command_projects_until_poll_confirms() {
        let state = reduce(
            ReconciledState::default(),
            SyncEvent::StatusReceived(status(1, DeviceState::Running)),
        );
        let (state, id) = acked(state, CommandKind::Stop, 5);
        assert_eq!(state.status.state, DeviceState::Idle);
        assert_eq!(state.status_source, StatusSource::Projected);

        let state = reduce(state, SyncEvent::StatusReceived(status(2, DeviceState::Running)));
        assert_eq!(state.status_source, StatusSource::Projected);
        assert_eq!(
            state.pending_command.as_ref().and_then(|c| c.confirmation),
            Some(Confirmation::Awaiting {
                polls_seen: 1,
                polls_allowed: 5
            })
        );

        let state = reduce(state, SyncEvent::StatusReceived(status(3, DeviceState::Idle)));
        assert!(state.pending_command.is_none());
        assert_eq!(state.status_source, StatusSource::Polled);
        assert_eq!(
            state.command(id).and_then(|c| c.confirmation),
            Some(Confirmation::Confirmed)
        );
    }

    #[test]
    fn exhausted_polls_leave_command_unconfirmed_with_warning() {
        let state = reduce(
            ReconciledState::default(),
            SyncEvent::StatusReceived(status(1, DeviceState::Running)),
        );
        let (mut state, id) = acked(state, CommandKind::Pause, 2);
        for seq in 2..=3 {
            state = reduce(state, SyncEvent::StatusReceived(status(seq, DeviceState::Running)));
        }
        assert!(state.pending_command.is_none());
        assert_eq!(state.status.state, DeviceState::Running);
        assert_eq!(
            state.command(id).and_then(|c| c.confirmation),
            Some(Confirmation::Unconfirmed)
        );
        assert!(state.last_error.as_ref().is_some_and(|e| e.is_warning()));
    }

    #[test]
    fn window_elapsing_restores_polled_status() {
        let state = reduce(
            ReconciledState::default(),
            SyncEvent::StatusReceived(status(1, DeviceState::Idle)),
        );
        let (state, id) = acked(state, CommandKind::Start, 5);
        assert_eq!(state.status.state, DeviceState::Running);

        let state = reduce(state, SyncEvent::ConfirmationWindowElapsed { id });
        assert_eq!(state.status.state, DeviceState::Idle);
        assert_eq!(state.status_source, StatusSource::Polled);
        assert_eq!(
            state.command(id).and_then(|c| c.confirmation),
            Some(Confirmation::Unconfirmed)
        );

        // a late duplicate is a no-op
        let again = reduce(state.clone(), SyncEvent::ConfirmationWindowElapsed { id });
        assert_eq!(again.command_history, state.command_history);
    }

    #[test]
    fn new_dispatch_supersedes_unconfirmed_command() {
        let (state, first) = acked(ReconciledState::default(), CommandKind::Start, 5);
        let second = CommandRequest::new(CommandKind::Stop);
        let second_id = second.id;
        let state = reduce(state, SyncEvent::CommandDispatched(second));

        assert_eq!(state.pending_command.as_ref().map(|c| c.id), Some(second_id));
        assert_eq!(
            state.command(first).and_then(|c| c.confirmation),
            Some(Confirmation::Superseded)
        );
        assert_eq!(state.status_source, StatusSource::Polled);
    }

    #[test]
    fn failed_command_is_archived_with_transport_error() {
        let req = CommandRequest::new(CommandKind::Start);
        let id = req.id;
        let state = reduce(ReconciledState::default(), SyncEvent::CommandDispatched(req));
        let state = reduce(
            state,
            SyncEvent::CommandFailed {
                id,
                error: "timed out".into(),
                timed_out: true,
            },
        );
        assert!(state.pending_command.is_none());
        assert_eq!(state.command(id).map(|c| c.state), Some(CommandState::TimedOut));
        assert_eq!(state.last_error.as_ref().map(|e| e.kind), Some(ErrorKind::Transport));
    }

    #[test]
    fn history_is_bounded() {
        let mut state = ReconciledState::default();
        for _ in 0..plotter_config::COMMAND_HISTORY_LIMIT + 5 {
            let req = CommandRequest::new(CommandKind::Start);
            let id = req.id;
            state = reduce(state, SyncEvent::CommandDispatched(req));
            state = reduce(
                state,
                SyncEvent::CommandFailed {
                    id,
                    error: "refused".into(),
                    timed_out: false,
                },
            );
        }
        assert_eq!(state.command_history.len(), plotter_config::COMMAND_HISTORY_LIMIT);
    }

    fn select(state: ReconciledState, project_id: &str) -> ReconciledState {
        reduce(
            state,
            SyncEvent::ActiveProjectChanged {
                project_id: Some(project_id.into()),
                uploads: vec![],
            },
        )
    }

    fn project(id: &str, images: &[&str]) -> Project {
        Project {
            id: id.into(),
            name: "Spiral".into(),
            parameters: Default::default(),
            image_refs: images.iter().map(|s| s.to_string()).collect(),
            created_at: None,
        }
    }

    #[test]
    fn project_events_for_inactive_projects_are_ignored() {
        let state = select(ReconciledState::default(), "b");
        let state = reduce(
            state,
            SyncEvent::ProjectLoaded {
                project: project("a", &[]),
                revision: 1,
            },
        );
        assert!(state.active_project.is_none());

        let state = reduce(
            state,
            SyncEvent::UploadChanged(UploadTask::queued("a".into(), "x.png".into(), 10)),
        );
        assert!(state.uploads.is_empty());
    }

    #[test]
    fn older_project_load_never_replaces_a_newer_one() {
        let state = select(ReconciledState::default(), "p");
        let state = reduce(
            state,
            SyncEvent::ProjectLoaded {
                project: project("p", &["new.png"]),
                revision: 2,
            },
        );
        let state = reduce(
            state,
            SyncEvent::ProjectLoaded {
                project: project("p", &[]),
                revision: 1,
            },
        );
        let images = state.active_project.as_ref().map(|p| p.image_refs.clone());
        assert_eq!(images, Some(vec!["new.png".to_string()]));
        assert_eq!(state.project_revision, 2);

        let state = reduce(
            state,
            SyncEvent::ProjectLoadFailed {
                project_id: "p".into(),
                error: "timeout".into(),
                revision: 1,
            },
        );
        assert!(state.last_error.is_none());

        // reselecting starts over
        let state = select(select(state, "q"), "p");
        assert_eq!(state.project_revision, 0);
        let state = reduce(
            state,
            SyncEvent::ProjectLoaded {
                project: project("p", &[]),
                revision: 3,
            },
        );
        assert!(state.active_project.is_some());
    }

    #[test]
    fn running_upload_unknown_to_the_selection_is_dropped() {
        let state = select(ReconciledState::default(), "p");
        let mut ghost = UploadTask::queued("p".into(), "x.png".into(), 10);
        ghost.state = UploadState::InProgress;
        ghost.bytes_sent = 9;
        let state = reduce(state, SyncEvent::UploadChanged(ghost));
        assert!(state.uploads.is_empty());

        let mut live = UploadTask::queued("p".into(), "y.png".into(), 10);
        live.state = UploadState::InProgress;
        let other = UploadTask::queued("q".into(), "z.png".into(), 10);
        let state = reduce(
            state,
            SyncEvent::ActiveProjectChanged {
                project_id: None,
                uploads: vec![],
            },
        );
        let state = reduce(
            state,
            SyncEvent::ActiveProjectChanged {
                project_id: Some("p".into()),
                uploads: vec![live.clone(), other],
            },
        );
        assert_eq!(state.uploads.len(), 1);

        live.bytes_sent = 5;
        let state = reduce(state, SyncEvent::UploadChanged(live.clone()));
        assert_eq!(state.upload(live.id).map(|t| t.bytes_sent), Some(5));

        let mut queued_again = live.clone();
        queued_again.state = UploadState::Queued;
        let state = reduce(state, SyncEvent::UploadChanged(queued_again));
        assert_eq!(state.upload(live.id).map(|t| t.state), Some(UploadState::InProgress));
    }

    #[test]
    fn terminal_upload_is_never_regressed() {
        let state = select(ReconciledState::default(), "p");
        let mut task = UploadTask::queued("p".into(), "x.png".into(), 10);
        let state = reduce(state, SyncEvent::UploadChanged(task.clone()));
        task.state = UploadState::InProgress;
        task.bytes_sent = 6;
        let state = reduce(state, SyncEvent::UploadChanged(task.clone()));

        let mut behind = task.clone();
        behind.bytes_sent = 3;
        let state = reduce(state, SyncEvent::UploadChanged(behind));
        assert_eq!(state.upload(task.id).map(|t| t.bytes_sent), Some(6));

        let mut cancelled = task.clone();
        cancelled.state = UploadState::Cancelled;
        let state = reduce(state, SyncEvent::UploadChanged(cancelled));

        let mut late = task.clone();
        late.state = UploadState::Succeeded;
        late.bytes_sent = 10;
        let state = reduce(state, SyncEvent::UploadChanged(late));
        assert_eq!(state.upload(task.id).map(|t| t.state), Some(UploadState::Cancelled));
    }
}
