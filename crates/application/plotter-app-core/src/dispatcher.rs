use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use plotter_core::{CommandId, CommandKind, CommandRequest, Confirmation, DeviceStatus};
use plotter_infra::PlotterApi;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::app_core::SyncEvent;
use crate::domain::{ClientSettings, ReconciledState};
use crate::error::ClientError;

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub command_timeout: Duration,
    pub confirmation_window: Duration,
    pub confirmation_polls: u32,
}

impl From<&ClientSettings> for DispatchSettings {
    fn from(s: &ClientSettings) -> Self {
        Self {
            command_timeout: s.command_timeout(),
            confirmation_window: s.confirmation_window(),
            confirmation_polls: s.confirmation_polls(),
        }
    }
}

/// What one status poll means for a command awaiting confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollVerdict {
    Confirmed,
    Waiting { polls_seen: u32, polls_allowed: u32 },
    Exhausted,
}

/// `None` when `cmd` is not awaiting confirmation.
pub fn observe_poll(cmd: &CommandRequest, status: &DeviceStatus) -> Option<PollVerdict> {
    if !cmd.is_awaiting_confirmation() {
        return None;
    }
    let Some(Confirmation::Awaiting {
        polls_seen,
        polls_allowed,
    }) = cmd.confirmation
    else {
        return None;
    };
    if status.state == cmd.kind.expected_state() {
        return Some(PollVerdict::Confirmed);
    }
    let polls_seen = polls_seen + 1;
    if polls_seen >= polls_allowed {
        Some(PollVerdict::Exhausted)
    } else {
        Some(PollVerdict::Waiting {
            polls_seen,
            polls_allowed,
        })
    }
}

/// Sends device commands one at a time.
///
/// The slot is held from `reserve` until the transport call settles; the
/// confirmation phase that follows does not block the next command.
pub struct CommandDispatcher<A: PlotterApi> {
    api: Arc<A>,
    tx: mpsc::Sender<SyncEvent>,
    settings: DispatchSettings,
    in_flight: Arc<Mutex<Option<CommandId>>>,
    watchers: Mutex<HashMap<CommandId, watch::Sender<CommandRequest>>>,
}

impl<A: PlotterApi> CommandDispatcher<A> {
    pub fn new(api: Arc<A>, tx: mpsc::Sender<SyncEvent>, settings: DispatchSettings) -> Self {
        Self {
            api,
            tx,
            settings,
            in_flight: Arc::new(Mutex::new(None)),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_flight(&self) -> Option<CommandId> {
        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for a new request, or report the one still holding it.
    pub fn reserve(&self, kind: CommandKind) -> Result<CommandRequest, ClientError> {
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = *slot {
            debug!(%kind, %pending, "rejecting command, another is in flight");
            return Err(ClientError::CommandInFlight { pending });
        }
        let req = CommandRequest::new(kind);
        *slot = Some(req.id);
        Ok(req)
    }

    /// Send a reserved request. Outcome events go to the kernel channel.
    pub fn launch(&self, req: CommandRequest) -> CommandHandle {
        let (watch_tx, rx) = watch::channel(req.clone());
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(req.id, watch_tx);

        let id = req.id;
        let kind = req.kind;
        let api = self.api.clone();
        let tx = self.tx.clone();
        let settings = self.settings;
        let in_flight = self.in_flight.clone();

        crate::async_runtime::spawn(async move {
            let res = tokio::time::timeout(settings.command_timeout, api.send_command(kind)).await;
            let ev = match res {
                Ok(Ok(ack)) => {
                    info!(%id, %kind, status = ?ack.status, "command acknowledged");
                    SyncEvent::CommandAcknowledged {
                        id,
                        at: Utc::now(),
                        polls_allowed: settings.confirmation_polls,
                    }
                }
                Ok(Err(e)) => {
                    warn!(%id, %kind, "command failed: {e}");
                    SyncEvent::CommandFailed {
                        id,
                        error: e.to_string(),
                        timed_out: e.is_timeout(),
                    }
                }
                Err(_) => {
                    warn!(%id, %kind, "command timed out");
                    SyncEvent::CommandFailed {
                        id,
                        error: format!(
                            "no answer within {} ms",
                            settings.command_timeout.as_millis()
                        ),
                        timed_out: true,
                    }
                }
            };

            {
                let mut slot = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                if *slot == Some(id) {
                    *slot = None;
                }
            }

            let acknowledged = matches!(ev, SyncEvent::CommandAcknowledged { .. });
            if tx.send(ev).await.is_err() {
                return;
            }
            if acknowledged {
                tokio::time::sleep(settings.confirmation_window).await;
                let _ = tx.send(SyncEvent::ConfirmationWindowElapsed { id }).await;
            }
        });

        CommandHandle { id, kind, rx }
    }

    /// Push the reconciled view of every watched command to its handle.
    pub fn publish_from(&self, state: &ReconciledState) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.retain(|id, tx| {
            let Some(cmd) = state.command(*id) else {
                return !tx.is_closed();
            };
            tx.send_if_modified(|current| {
                if current != cmd {
                    *current = cmd.clone();
                    true
                } else {
                    false
                }
            });
            !cmd.is_resolved() && !tx.is_closed()
        });
    }
}

/// Observes one command as the kernel reconciles it.
#[derive(Debug, Clone)]
pub struct CommandHandle {
    id: CommandId,
    kind: CommandKind,
    rx: watch::Receiver<CommandRequest>,
}

impl CommandHandle {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn current(&self) -> CommandRequest {
        self.rx.borrow().clone()
    }

    /// Wait until the transport call settles (acknowledged, failed or timed out).
    pub async fn acknowledged(&mut self) -> CommandRequest {
        self.wait(|c| !c.is_pending()).await
    }

    /// Wait until the command can no longer change.
    pub async fn resolved(&mut self) -> CommandRequest {
        self.wait(CommandRequest::is_resolved).await
    }

    async fn wait(&mut self, done: impl FnMut(&CommandRequest) -> bool) -> CommandRequest {
        let seen = self.rx.wait_for(done).await.map(|r| r.clone()).ok();
        seen.unwrap_or_else(|| self.rx.borrow().clone())
    }
}
