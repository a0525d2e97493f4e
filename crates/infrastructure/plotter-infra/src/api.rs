use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use plotter_core::{CommandKind, NewProject, Project, StatusPayload, UploadReceipt};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Receives the cumulative number of bytes handed to the connection.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Acknowledgement body of `POST /command/{cmd}`. Any 2xx counts as acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// An image ready to be sent to the device.
#[derive(Debug, Clone)]
pub struct UploadSource {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadSource {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let file_name = file_name.into();
        let content_type = guess_content_type(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes: bytes.into(),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        Ok(Self::new(file_name, bytes))
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn guess_content_type(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Request/response primitive for the plotter REST surface.
#[async_trait::async_trait]
pub trait PlotterApi: Send + Sync + 'static {
    async fn fetch_status(&self) -> Result<StatusPayload, TransportError>;
    async fn send_command(&self, kind: CommandKind) -> Result<CommandAck, TransportError>;
    async fn list_projects(&self) -> Result<Vec<Project>, TransportError>;
    async fn get_project(&self, project_id: &str) -> Result<Project, TransportError>;
    async fn create_project(&self, project: &NewProject) -> Result<Project, TransportError>;
    async fn delete_project(&self, project_id: &str) -> Result<(), TransportError>;
    async fn upload_image(
        &self,
        project_id: &str,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, TransportError>;

    /// Base every resource URL is resolved against. Must end with `/`.
    fn base_url(&self) -> &reqwest::Url;

    fn thumbnail_url(&self, project_id: &str) -> Result<reqwest::Url, TransportError> {
        resource_url(self.base_url(), &["projects", project_id, "thumbnail"])
    }

    fn image_url(&self, project_id: &str, filename: &str) -> Result<reqwest::Url, TransportError> {
        resource_url(self.base_url(), &["projects", project_id, "images", filename])
    }
}

/// Append path segments to `base`, percent-encoding each one.
pub fn resource_url(base: &reqwest::Url, segments: &[&str]) -> Result<reqwest::Url, TransportError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| TransportError::InvalidRequest(format!("{base} cannot be a base")))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}
