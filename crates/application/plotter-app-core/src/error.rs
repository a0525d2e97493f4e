use plotter_core::{CommandId, ErrorKind, ProjectId, UploadTaskId};
use plotter_infra::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("command {pending} is still waiting for the device to answer")]
    CommandInFlight { pending: CommandId },
    #[error("project {project_id} was deleted")]
    ResourceInvalidated { project_id: ProjectId },
    #[error("refusing to upload empty file {file_name}")]
    EmptyUpload { file_name: String },
    #[error("unknown or finished upload task {0}")]
    UnknownUploadTask(UploadTaskId),
    #[error("could not read upload source: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::CommandInFlight { .. } => ErrorKind::CommandInFlight,
            ClientError::ResourceInvalidated { .. } => ErrorKind::ResourceInvalidated,
            ClientError::EmptyUpload { .. }
            | ClientError::UnknownUploadTask(_)
            | ClientError::Io(_) => ErrorKind::Upload,
        }
    }
}
