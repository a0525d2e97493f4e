use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::DeviceState;
use crate::CommandId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandKind {
    Start,
    Stop,
    Pause,
}

impl CommandKind {
    /// Path segment used by `POST /command/{cmd}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Start => "START",
            CommandKind::Stop => "STOP",
            CommandKind::Pause => "PAUSE",
        }
    }

    /// The device state that confirms this command took effect.
    pub fn expected_state(&self) -> DeviceState {
        match self {
            CommandKind::Start => DeviceState::Running,
            CommandKind::Stop => DeviceState::Idle,
            CommandKind::Pause => DeviceState::Paused,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the transport round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    Pending,
    Acknowledged,
    Failed,
    TimedOut,
}

/// Outcome of watching status polls after acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confirmation {
    Awaiting { polls_seen: u32, polls_allowed: u32 },
    Confirmed,
    /// The device never reported the expected state inside the window. A warning only.
    Unconfirmed,
    /// A newer command was dispatched before this one was confirmed.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub id: CommandId,
    pub kind: CommandKind,
    pub issued_at: DateTime<Utc>,
    pub state: CommandState,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub confirmation: Option<Confirmation>,
    pub error: Option<String>,
}

impl CommandRequest {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            id: CommandId::new(),
            kind,
            issued_at: Utc::now(),
            state: CommandState::Pending,
            acknowledged_at: None,
            confirmation: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == CommandState::Pending
    }

    pub fn is_awaiting_confirmation(&self) -> bool {
        self.state == CommandState::Acknowledged
            && matches!(self.confirmation, Some(Confirmation::Awaiting { .. }))
    }

    /// True once nothing further can happen to this request.
    pub fn is_resolved(&self) -> bool {
        match self.state {
            CommandState::Pending => false,
            CommandState::Failed | CommandState::TimedOut => true,
            CommandState::Acknowledged => !matches!(
                self.confirmation,
                None | Some(Confirmation::Awaiting { .. })
            ),
        }
    }
}
