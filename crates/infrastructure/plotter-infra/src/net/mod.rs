use std::time::Duration;

use plotter_core::{CommandKind, NewProject, Project, StatusPayload, UploadReceipt};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{resource_url, CommandAck, PlotterApi, ProgressFn, UploadSource};
use crate::error::TransportError;

mod upload;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared client with connect timeout only; uploads must not hit a whole-request deadline.
pub fn default_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("plotter-client/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Normalize an API base so relative joins land *under* it.
///
/// `http://host/api` and `http://host/api/` both become `http://host/api/`.
pub fn normalize_base_url(raw: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| TransportError::InvalidRequest(format!("invalid base url {raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(TransportError::InvalidRequest(format!(
            "{raw} cannot be used as a base url"
        )));
    }
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// `reqwest` implementation of the plotter REST surface.
#[derive(Clone)]
pub struct HttpPlotterApi {
    client: Client,
    base: Url,
    status_timeout: Option<Duration>,
}

impl HttpPlotterApi {
    pub fn new(client: Client, base_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            client,
            base: normalize_base_url(base_url)?,
            status_timeout: None,
        })
    }

    /// Bound each `GET /status` so a hung device cannot stall the poller.
    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = Some(timeout);
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        resource_url(&self.base, segments)
    }

    async fn execute(&self, url: &Url, req: RequestBuilder) -> Result<Response, TransportError> {
        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::Http {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        url: &Url,
        req: RequestBuilder,
    ) -> Result<T, TransportError> {
        let bytes = self
            .execute(url, req)
            .await?
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;

        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl PlotterApi for HttpPlotterApi {
    async fn fetch_status(&self) -> Result<StatusPayload, TransportError> {
        let url = self.endpoint(&["status"])?;
        let mut req = self.client.get(url.clone());
        if let Some(t) = self.status_timeout {
            req = req.timeout(t);
        }
        self.json(&url, req).await
    }

    async fn send_command(&self, kind: CommandKind) -> Result<CommandAck, TransportError> {
        let url = self.endpoint(&["command", kind.as_str()])?;
        let bytes = self
            .execute(&url, self.client.post(url.clone()))
            .await?
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        // Devices differ in what they put in the body; the 2xx is the acknowledgement.
        let ack = serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            debug!("{kind} acknowledged with non-JSON body: {e}");
            CommandAck::default()
        });
        Ok(ack)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TransportError> {
        let url = self.endpoint(&["projects"])?;
        self.json(&url, self.client.get(url.clone())).await
    }

    async fn get_project(&self, project_id: &str) -> Result<Project, TransportError> {
        let url = self.endpoint(&["projects", project_id])?;
        self.json(&url, self.client.get(url.clone())).await
    }

    async fn create_project(&self, project: &NewProject) -> Result<Project, TransportError> {
        let url = self.endpoint(&["projects"])?;
        self.json(&url, self.client.post(url.clone()).json(project))
            .await
    }

    async fn delete_project(&self, project_id: &str) -> Result<(), TransportError> {
        let url = self.endpoint(&["projects", project_id])?;
        self.execute(&url, self.client.delete(url.clone())).await?;
        Ok(())
    }

    async fn upload_image(
        &self,
        project_id: &str,
        source: UploadSource,
        progress: ProgressFn,
    ) -> Result<UploadReceipt, TransportError> {
        let url = self.endpoint(&["projects", project_id, "image_upload"])?;
        let file_name = source.file_name.clone();
        let form = upload::multipart_form(source, progress)?;

        let bytes = self
            .execute(&url, self.client.post(url.clone()).multipart(form))
            .await?
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&url, e))?;

        let mut receipt: UploadReceipt = serde_json::from_slice(&bytes).unwrap_or_default();
        if receipt.filename.is_none() {
            receipt.filename = Some(file_name);
        }
        Ok(receipt)
    }

    fn base_url(&self) -> &Url {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let url = normalize_base_url("http://127.0.0.1:8000/api").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/api/");

        let url = normalize_base_url("http://127.0.0.1:8000").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/");
    }

    #[test]
    fn garbage_base_url_is_rejected() {
        assert!(matches!(
            normalize_base_url("not a url"),
            Err(TransportError::InvalidRequest(_))
        ));
        assert!(normalize_base_url("mailto:someone@example.com").is_err());
    }
}
