use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use plotter_core::{NewProject, Project, ProjectId};
use plotter_infra::PlotterApi;
use reqwest::Url;
use tokio::sync::mpsc;
use tracing::debug;

use crate::app_core::SyncEvent;
use crate::error::ClientError;

/// Project CRUD plus background refreshes of the active project.
///
/// Every fetch whose result reaches the reconciled state is numbered when it
/// is issued, so a slow answer cannot replace a newer one.
pub struct ProjectRepository<A: PlotterApi> {
    api: Arc<A>,
    tx: mpsc::Sender<SyncEvent>,
    revisions: AtomicU64,
}

impl<A: PlotterApi> ProjectRepository<A> {
    pub fn new(api: Arc<A>, tx: mpsc::Sender<SyncEvent>) -> Self {
        Self {
            api,
            tx,
            revisions: AtomicU64::new(0),
        }
    }

    /// Next fetch revision, starting at 1.
    pub fn next_revision(&self) -> u64 {
        self.revisions.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub async fn list(&self) -> Result<Vec<Project>, ClientError> {
        Ok(self.api.list_projects().await?)
    }

    pub async fn get(&self, project_id: &str) -> Result<Project, ClientError> {
        Ok(self.api.get_project(project_id).await?)
    }

    pub async fn create(&self, project: &NewProject) -> Result<Project, ClientError> {
        let created = self.api.create_project(project).await?;
        debug!(project = %created.id, name = %created.name, "project created");
        Ok(created)
    }

    pub async fn delete(&self, project_id: &str) -> Result<(), ClientError> {
        self.api.delete_project(project_id).await?;
        debug!(project = %project_id, "project deleted");
        Ok(())
    }

    /// Fetch `project_id` off the caller's path; the result arrives as a `SyncEvent`.
    pub fn refresh_in_background(&self, project_id: ProjectId) {
        let revision = self.next_revision();
        let api = self.api.clone();
        let tx = self.tx.clone();
        crate::async_runtime::spawn(async move {
            let ev = match api.get_project(&project_id).await {
                Ok(project) => SyncEvent::ProjectLoaded { project, revision },
                Err(e) => SyncEvent::ProjectLoadFailed {
                    project_id,
                    error: e.to_string(),
                    revision,
                },
            };
            let _ = tx.send(ev).await;
        });
    }

    pub fn thumbnail_url(&self, project_id: &str) -> Result<Url, ClientError> {
        Ok(self.api.thumbnail_url(project_id)?)
    }

    pub fn image_url(&self, project_id: &str, filename: &str) -> Result<Url, ClientError> {
        Ok(self.api.image_url(project_id, filename)?)
    }
}
