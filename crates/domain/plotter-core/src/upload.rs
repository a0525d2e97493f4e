use serde::{Deserialize, Serialize};

use crate::project::ProjectId;
use crate::UploadTaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Succeeded | UploadState::Failed | UploadState::Cancelled
        )
    }
}

/// Observable view of one image upload. The source bytes stay with the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadTask {
    pub id: UploadTaskId,
    pub project_id: ProjectId,
    pub file_name: String,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub state: UploadState,
    pub error: Option<String>,
    pub stored_as: Option<String>,
}

impl UploadTask {
    pub fn queued(project_id: ProjectId, file_name: String, total_bytes: u64) -> Self {
        Self {
            id: UploadTaskId::new(),
            project_id,
            file_name,
            bytes_sent: 0,
            total_bytes,
            state: UploadState::Queued,
            error: None,
            stored_as: None,
        }
    }

    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_sent as f64 / self.total_bytes as f64
    }
}

/// Body returned by `POST /projects/{id}/image_upload`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(default, alias = "file", alias = "name")]
    pub filename: Option<String>,
}
