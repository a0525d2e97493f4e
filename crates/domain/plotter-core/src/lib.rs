use serde::{Deserialize, Serialize};

pub mod command;
pub mod project;
pub mod record;
pub mod status;
pub mod upload;

pub use command::{CommandKind, CommandRequest, CommandState, Confirmation};
pub use project::{NewProject, Project, ProjectId};
pub use record::{ErrorKind, ErrorRecord};
pub use status::{DeviceState, DeviceStatus, StatusPayload};
pub use upload::{UploadReceipt, UploadState, UploadTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub uuid::Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadTaskId(pub uuid::Uuid);

impl UploadTaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for UploadTaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UploadTaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
